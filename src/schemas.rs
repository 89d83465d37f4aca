use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    services::invoice_ledger::{
        AmenityCharge, InvoiceAction, InvoiceStatus, InvoiceTarget, OwnerInvoiceRequest,
        PaymentUpdate,
    },
    tenancy::{UnitAmenity, AMENITY_NAMES, MAX_UNIT_AMENITIES},
};

pub const TICKET_STATUSES: &[&str] = &["open", "in_progress", "resolved", "closed"];
pub const MAINTENANCE_STATUSES: &[&str] = &["pending", "resolved"];

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 500)
}

fn default_limit_100() -> i64 {
    100
}
fn default_one() -> i32 {
    1
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn check_rent(rent: Decimal) -> AppResult<()> {
    if rent > Decimal::ZERO {
        return Ok(());
    }
    Err(AppError::UnprocessableEntity(
        "Validation failed: rent must be greater than zero.".to_string(),
    ))
}

pub fn check_amenities(amenities: &[UnitAmenity]) -> AppResult<()> {
    if amenities.len() > MAX_UNIT_AMENITIES {
        return Err(AppError::UnprocessableEntity(format!(
            "Validation failed: a unit has at most {MAX_UNIT_AMENITIES} amenities."
        )));
    }
    for amenity in amenities {
        let name = amenity.name.trim();
        if !name.is_empty() && !AMENITY_NAMES.contains(&name) {
            return Err(AppError::UnprocessableEntity(format!(
                "Validation failed: unknown amenity '{name}'."
            )));
        }
        if amenity.cost < Decimal::ZERO {
            return Err(AppError::UnprocessableEntity(format!(
                "Validation failed: amenity '{name}' has a negative cost."
            )));
        }
    }
    Ok(())
}

pub fn check_status(status: &str, allowed: &[&str]) -> AppResult<String> {
    let normalized = status.trim().to_ascii_lowercase();
    if allowed.contains(&normalized.as_str()) {
        return Ok(normalized);
    }
    Err(AppError::BadRequest(format!(
        "Invalid status '{normalized}'. Expected one of: {}.",
        allowed.join(", ")
    )))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListQuery {
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

// Identity

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RegisterInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[serde(skip_serializing)]
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    pub phone: Option<String>,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
    pub company: Option<String>,
    pub work_address: Option<String>,
    pub government_id_type: Option<String>,
    pub government_id_number: Option<String>,
    pub government_id_file: Option<String>,
    pub agreement_file: Option<String>,
    pub profile_photo: Option<String>,
    #[validate(range(min = 1, max = 50))]
    pub persons_living: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordInput {
    #[validate(length(min = 1))]
    pub old_password: String,
    #[validate(length(min = 6, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub phone: Option<String>,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
    pub company: Option<String>,
    pub work_address: Option<String>,
    pub profile_photo: Option<String>,
}

// Owners

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOwnerInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    pub documents: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateOwnerProfileInput {
    pub license_number: Option<String>,
    pub documents: Option<String>,
    pub verified: Option<bool>,
}

// Properties

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub address: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub payment_qr: Option<String>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub ifsc: Option<String>,
    pub upi_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub address: Option<String>,
    pub images: Option<Vec<String>>,
    pub payment_qr: Option<String>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub ifsc: Option<String>,
    pub upi_id: Option<String>,
}

// Units

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateUnitInput {
    pub property_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub number: String,
    pub rent: Decimal,
    #[serde(default)]
    pub amenities: Vec<UnitAmenity>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default = "default_one")]
    #[validate(range(min = 0, max = 100))]
    pub rooms: i32,
    #[serde(default = "default_one")]
    #[validate(range(min = 0, max = 100))]
    pub halls: i32,
    #[serde(default = "default_one")]
    #[validate(range(min = 0, max = 100))]
    pub bathrooms: i32,
    #[serde(default)]
    pub balcony: bool,
    #[serde(default)]
    pub map_link: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateUnitInput {
    #[validate(length(min = 1, max = 64))]
    pub number: Option<String>,
    pub rent: Option<Decimal>,
    pub amenities: Option<Vec<UnitAmenity>>,
    pub photos: Option<Vec<String>>,
    #[validate(range(min = 0, max = 100))]
    pub rooms: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub halls: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub bathrooms: Option<i32>,
    pub balcony: Option<bool>,
    pub map_link: Option<String>,
    pub description: Option<String>,
}

/// `tenant_id: null` unassigns the current tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignTenantInput {
    pub tenant_id: Option<Uuid>,
}

// Invoices

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceInput {
    pub target: Option<String>,
    pub unit_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub month: Option<String>,
    pub amount: Option<Decimal>,
    pub amenities: Option<Vec<AmenityCharge>>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub overwrite: bool,
}

impl CreateInvoiceInput {
    pub fn into_request(self) -> AppResult<OwnerInvoiceRequest> {
        let month = trimmed(self.month)
            .ok_or_else(|| AppError::BadRequest("month is required.".to_string()))?
            .parse()
            .map_err(|error| AppError::BadRequest(format!("{error}")))?;

        let target = match trimmed(self.target).as_deref().unwrap_or("unit") {
            "unit" | "specific" => InvoiceTarget::Unit(self.unit_id.ok_or_else(|| {
                AppError::BadRequest("unitId is required for the unit target.".to_string())
            })?),
            "property" => InvoiceTarget::Property(self.property_id.ok_or_else(|| {
                AppError::BadRequest("propertyId is required for the property target.".to_string())
            })?),
            "all" => InvoiceTarget::AllUnits,
            other => {
                return Err(AppError::BadRequest(format!(
                    "Invalid target '{other}'. Expected unit, property or all."
                )))
            }
        };

        if let Some(amenities) = &self.amenities {
            if amenities.iter().any(|charge| charge.cost < Decimal::ZERO) {
                return Err(AppError::BadRequest(
                    "Amenity costs must not be negative.".to_string(),
                ));
            }
        }

        Ok(OwnerInvoiceRequest {
            target,
            month,
            amount: self.amount,
            amenities: self.amenities,
            description: trimmed(self.description),
            due_date: self.due_date,
            overwrite: self.overwrite,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoiceInput {
    pub status: Option<InvoiceStatus>,
    pub txn_id: Option<String>,
    pub screenshot: Option<String>,
    pub action: Option<InvoiceAction>,
}

impl From<UpdateInvoiceInput> for PaymentUpdate {
    fn from(input: UpdateInvoiceInput) -> Self {
        Self {
            status: input.status,
            txn_id: trimmed(input.txn_id),
            screenshot: trimmed(input.screenshot),
            action: input.action,
        }
    }
}

// Tickets and maintenance

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateTicketInput {
    #[validate(length(min = 1, max = 255))]
    pub subject: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusInput {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateMaintenanceInput {
    #[validate(length(min = 1, max = 5000))]
    pub description: String,
    pub image: Option<String>,
}

// Tenant profiles

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpsertTenantProfileInput {
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub id_proof: Option<String>,
    #[validate(range(min = 1, max = 50))]
    pub number_of_persons: Option<i32>,
    pub rent_agreement: Option<String>,
}

// Paths

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPath {
    pub property_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitPath {
    pub unit_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePath {
    pub invoice_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerPath {
    pub owner_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPath {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantPath {
    pub tenant_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketPath {
    pub ticket_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenancePath {
    pub request_id: Uuid,
}

// Blog

/// One block of a post body, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlogBlock {
    Text { text: String },
    Image { image: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateBlogPostInput {
    #[validate(length(max = 255))]
    pub title: String,
    #[serde(default)]
    pub content: Vec<BlogBlock>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateBlogPostInput {
    #[validate(length(max = 255))]
    pub title: Option<String>,
    pub content: Option<Vec<BlogBlock>>,
}

pub fn check_blog_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Title is required.".to_string()));
    }
    Ok(title.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlogPostPath {
    pub post_id: Uuid,
}
