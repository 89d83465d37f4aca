use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    repository::table_service::get_row,
    services::billing_month::BillingMonth,
};

pub const MAX_UNIT_AMENITIES: usize = 4;
pub const AMENITY_NAMES: &[&str] = &[
    "Parking",
    "Electricity",
    "Maintenance",
    "Water",
    "Internet",
    "Other",
];

/// A recurring charge configured on a unit. Empty names and zero costs are
/// allowed in storage but never billed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAmenity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cost: Decimal,
}

impl UnitAmenity {
    pub fn is_billable(&self) -> bool {
        !self.name.trim().is_empty() && self.cost > Decimal::ZERO
    }
}

/// The slice of a unit the ledger needs: pricing, tenancy and the owner of
/// the enclosing property.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    pub id: Uuid,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub number: String,
    pub rent: Decimal,
    pub tenant_id: Option<Uuid>,
    pub tenant_name: Option<String>,
    pub tenant_added_at: Option<DateTime<Utc>>,
    pub amenities: Vec<UnitAmenity>,
}

impl UnitSnapshot {
    pub fn billable_amenities(&self) -> impl Iterator<Item = &UnitAmenity> {
        self.amenities.iter().filter(|amenity| amenity.is_billable())
    }

    /// First billable month of the current tenancy, if the unit is occupied.
    pub fn anchor_month(&self) -> Option<BillingMonth> {
        self.tenant_id?;
        self.tenant_added_at.map(BillingMonth::of_timestamp)
    }

    pub fn is_occupied(&self) -> bool {
        self.tenant_id.is_some()
    }
}

/// Only the owner of the enclosing property may change a unit or its billing.
pub fn assert_unit_owner(unit: &UnitSnapshot, user: &AuthUser) -> AppResult<()> {
    if unit.owner_id == user.id {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: you do not own this unit.".to_string(),
    ))
}

pub fn assert_unit_reader(unit: &UnitSnapshot, user: &AuthUser) -> AppResult<()> {
    if user.is_admin() || unit.owner_id == user.id || unit.tenant_id == Some(user.id) {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: you are not the owner or tenant of this unit.".to_string(),
    ))
}

pub async fn load_owned_property(
    pool: &PgPool,
    property_id: Uuid,
    user: &AuthUser,
) -> AppResult<Value> {
    let property = get_row(pool, "properties", &property_id.to_string(), "id").await?;
    let owner_id = property
        .get("owner_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if owner_id == user.id.to_string() {
        return Ok(property);
    }
    Err(AppError::Forbidden(
        "Forbidden: you do not own this property.".to_string(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenancy {
    pub tenant_id: Option<Uuid>,
    pub tenant_added_at: Option<DateTime<Utc>>,
}

/// Resolves the tenancy that results from assigning `requested` to a unit.
///
/// A different tenant restarts the billing anchor at `now`. Re-assigning the
/// current tenant keeps the existing anchor so that the backfill range does
/// not shrink. Unassigning clears both fields.
pub fn next_tenancy(current: Tenancy, requested: Option<Uuid>, now: DateTime<Utc>) -> Tenancy {
    match requested {
        None => Tenancy {
            tenant_id: None,
            tenant_added_at: None,
        },
        Some(tenant_id) if current.tenant_id == Some(tenant_id) => Tenancy {
            tenant_id: Some(tenant_id),
            tenant_added_at: current.tenant_added_at.or(Some(now)),
        },
        Some(tenant_id) => Tenancy {
            tenant_id: Some(tenant_id),
            tenant_added_at: Some(now),
        },
    }
}
