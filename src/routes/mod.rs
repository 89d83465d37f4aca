use axum::{routing::get, Router};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    auth::{AuthUser, Role},
    error::{AppError, AppResult},
    repository::ledger_store::LedgerStore,
    state::AppState,
    tenancy::{assert_unit_owner, UnitSnapshot},
};

pub mod auth;
pub mod blog;
pub mod health;
pub mod invoices;
pub mod maintenance;
pub mod owners;
pub mod payment_history;
pub mod properties;
pub mod tenant_profiles;
pub mod tickets;
pub mod units;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(auth::router())
        .merge(owners::router())
        .merge(properties::router())
        .merge(units::router())
        .merge(invoices::router())
        .merge(payment_history::router())
        .merge(tickets::router())
        .merge(maintenance::router())
        .merge(tenant_profiles::router())
        .merge(blog::router())
}

/// Table filters restricting unit-linked rows (tickets, maintenance) to what
/// the caller may see. `None` means unrestricted.
pub(crate) async fn role_scope_filters<S>(
    store: &S,
    user: &AuthUser,
) -> AppResult<Option<Map<String, Value>>>
where
    S: LedgerStore + ?Sized,
{
    let mut filters = Map::new();
    match user.role {
        Role::Admin => return Ok(None),
        Role::Owner => {
            let unit_ids = store
                .list_owner_units(user.id)
                .await?
                .into_iter()
                .map(|unit| Value::String(unit.id.to_string()))
                .collect();
            filters.insert("unit_id__in".to_string(), Value::Array(unit_ids));
        }
        Role::Tenant => {
            filters.insert(
                "tenant_id".to_string(),
                Value::String(user.id.to_string()),
            );
        }
    }
    Ok(Some(filters))
}

pub(crate) async fn authorize_unit_owner<S>(
    store: &S,
    unit_id: Uuid,
    user: &AuthUser,
) -> AppResult<UnitSnapshot>
where
    S: LedgerStore + ?Sized,
{
    let unit = store
        .find_unit(unit_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
    assert_unit_owner(&unit, user)?;
    Ok(unit)
}
