use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{AuthUser, Role},
    error::{AppError, AppResult},
    repository::ledger_store::LedgerStore,
    services::billing_month::BillingMonth,
    tenancy::{UnitAmenity, UnitSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Due,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Due => "due",
            Self::Paid => "paid",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "pending" => Ok(Self::Pending),
            "due" => Ok(Self::Due),
            "paid" => Ok(Self::Paid),
            other => Err(AppError::BadRequest(format!(
                "Invalid invoice status '{other}'."
            ))),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner verification state, independent of the payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceAction {
    Pending,
    Verified,
}

impl InvoiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
        }
    }
}

impl FromStr for InvoiceAction {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            other => Err(AppError::BadRequest(format!(
                "Invalid invoice action '{other}'."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceOrigin {
    Monthly,
    Owner,
    Tenant,
}

impl InvoiceOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Owner => "owner",
            Self::Tenant => "tenant",
        }
    }
}

impl FromStr for InvoiceOrigin {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "monthly" => Ok(Self::Monthly),
            "owner" => Ok(Self::Owner),
            "tenant" => Ok(Self::Tenant),
            other => Err(AppError::BadRequest(format!(
                "Invalid invoice origin '{other}'."
            ))),
        }
    }
}

/// One line of an invoice's amenity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmenityCharge {
    pub name: String,
    pub cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&UnitAmenity> for AmenityCharge {
    fn from(amenity: &UnitAmenity) -> Self {
        Self {
            name: amenity.name.trim().to_string(),
            cost: amenity.cost,
            description: None,
        }
    }
}

pub fn charges_total(charges: &[AmenityCharge]) -> Decimal {
    charges.iter().map(|charge| charge.cost).sum()
}

pub fn unit_charges(unit: &UnitSnapshot) -> Vec<AmenityCharge> {
    unit.billable_amenities().map(AmenityCharge::from).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub month: BillingMonth,
    pub amount: Decimal,
    pub amenities: Vec<AmenityCharge>,
    pub status: InvoiceStatus,
    pub action: InvoiceAction,
    pub origin: Option<InvoiceOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of an invoice that does not exist yet. New invoices always start
/// unverified.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDraft {
    pub unit_id: Uuid,
    pub month: BillingMonth,
    pub amount: Decimal,
    pub amenities: Vec<AmenityCharge>,
    pub status: InvoiceStatus,
    pub origin: InvoiceOrigin,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl InvoiceDraft {
    /// The system-generated invoice for `month`: rent plus every billable
    /// amenity configured on the unit right now.
    pub fn monthly(unit: &UnitSnapshot, month: BillingMonth) -> Self {
        let amenities = unit_charges(unit);
        Self {
            unit_id: unit.id,
            month,
            amount: unit.rent + charges_total(&amenities),
            amenities,
            status: InvoiceStatus::Pending,
            origin: InvoiceOrigin::Monthly,
            description: None,
            due_date: None,
        }
    }
}

/// In-place replacement of an invoice's charges. `None` keeps the stored
/// description or due date.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRevision {
    pub amount: Decimal,
    pub amenities: Vec<AmenityCharge>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentUpdate {
    pub status: Option<InvoiceStatus>,
    pub txn_id: Option<String>,
    pub screenshot: Option<String>,
    pub action: Option<InvoiceAction>,
}

impl PaymentUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.txn_id.is_none()
            && self.screenshot.is_none()
            && self.action.is_none()
    }

    pub fn apply_to(&self, invoice: &mut InvoiceRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            invoice.status = status;
        }
        if let Some(txn_id) = &self.txn_id {
            invoice.txn_id = Some(txn_id.clone());
        }
        if let Some(screenshot) = &self.screenshot {
            invoice.screenshot = Some(screenshot.clone());
        }
        if let Some(action) = self.action {
            invoice.action = action;
        }
        invoice.updated_at = now;
    }
}

/// A history entry is owed only on the transition into `paid`.
pub fn enters_paid(prior: InvoiceStatus, next: InvoiceStatus) -> bool {
    prior != InvoiceStatus::Paid && next == InvoiceStatus::Paid
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistoryRecord {
    pub id: Uuid,
    pub unit_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub screenshot: Option<String>,
    pub txn_id: Option<String>,
    pub status: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentHistoryDraft {
    pub unit_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub screenshot: Option<String>,
    pub txn_id: Option<String>,
    pub details: String,
}

impl PaymentHistoryDraft {
    pub fn for_paid_invoice(invoice: &InvoiceRecord) -> Self {
        Self {
            unit_id: invoice.unit_id,
            invoice_id: invoice.id,
            amount: invoice.amount,
            date: invoice.month.first_day(),
            screenshot: invoice.screenshot.clone(),
            txn_id: invoice.txn_id.clone(),
            details: format!("Rent + amenities for {}", invoice.month),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub invoice: InvoiceRecord,
    pub history: Option<PaymentHistoryRecord>,
}

/// An invoice as listed to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerInvoiceView {
    #[serde(flatten)]
    pub invoice: InvoiceRecord,
    pub tenant_name: String,
    pub unit_number: String,
}

impl OwnerInvoiceView {
    pub fn new(invoice: InvoiceRecord, unit: &UnitSnapshot) -> Self {
        Self {
            invoice,
            tenant_name: unit.tenant_name.clone().unwrap_or_default(),
            unit_number: unit.number.clone(),
        }
    }
}

pub async fn ensure_monthly_invoice<S>(
    store: &S,
    unit: &UnitSnapshot,
    month: BillingMonth,
) -> AppResult<InvoiceRecord>
where
    S: LedgerStore + ?Sized,
{
    if !unit.is_occupied() {
        return Err(AppError::BadRequest(
            "Unit has no tenant assigned.".to_string(),
        ));
    }
    let anchor = unit.anchor_month().ok_or_else(|| {
        AppError::BadRequest("Unit has no tenant assignment date.".to_string())
    })?;
    if month < anchor {
        return Err(AppError::BadRequest(format!(
            "Month {month} precedes the tenancy start ({anchor})."
        )));
    }

    store
        .insert_monthly_invoice_if_absent(&InvoiceDraft::monthly(unit, month))
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceTarget {
    Unit(Uuid),
    Property(Uuid),
    AllUnits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnerInvoiceRequest {
    pub target: InvoiceTarget,
    pub month: BillingMonth,
    pub amount: Option<Decimal>,
    pub amenities: Option<Vec<AmenityCharge>>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub overwrite: bool,
}

impl OwnerInvoiceRequest {
    fn charges_for(&self, unit: &UnitSnapshot) -> (Decimal, Vec<AmenityCharge>) {
        // Supplied lines are billed as given, named or not.
        let amenities = match &self.amenities {
            Some(supplied) => supplied.clone(),
            None => unit_charges(unit),
        };
        let amount = self
            .amount
            .unwrap_or_else(|| unit.rent + charges_total(&amenities));
        (amount, amenities)
    }
}

/// Creates (or with `overwrite`, revises) owner invoices for the requested
/// target. Batch targets skip vacant units and units whose write fails.
pub async fn create_owner_invoices<S>(
    store: &S,
    owner_id: Uuid,
    request: &OwnerInvoiceRequest,
) -> AppResult<Vec<OwnerInvoiceView>>
where
    S: LedgerStore + ?Sized,
{
    if request.amount.is_some_and(|amount| amount < Decimal::ZERO) {
        return Err(AppError::BadRequest(
            "amount must not be negative.".to_string(),
        ));
    }

    let units = match request.target {
        InvoiceTarget::Unit(unit_id) => {
            let unit = store
                .find_unit(unit_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
            if unit.owner_id != owner_id {
                return Err(AppError::Forbidden(
                    "Forbidden: you do not own this unit.".to_string(),
                ));
            }
            if !unit.is_occupied() {
                return Err(AppError::BadRequest(
                    "Unit has no tenant assigned.".to_string(),
                ));
            }
            let invoice = create_owner_invoice(store, &unit, request).await?;
            return Ok(vec![invoice]);
        }
        InvoiceTarget::Property(property_id) => {
            let property_owner = store
                .find_property_owner(property_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Property not found.".to_string()))?;
            if property_owner != owner_id {
                return Err(AppError::Forbidden(
                    "Forbidden: you do not own this property.".to_string(),
                ));
            }
            store.list_property_units(property_id).await?
        }
        InvoiceTarget::AllUnits => store.list_owner_units(owner_id).await?,
    };

    let mut created = Vec::new();
    for unit in units.iter().filter(|unit| unit.is_occupied()) {
        match create_owner_invoice(store, unit, request).await {
            Ok(invoice) => created.push(invoice),
            Err(error) => {
                tracing::warn!(
                    unit_id = %unit.id,
                    month = %request.month,
                    error = %error,
                    "Skipped unit during batch invoice creation"
                );
            }
        }
    }
    Ok(created)
}

async fn create_owner_invoice<S>(
    store: &S,
    unit: &UnitSnapshot,
    request: &OwnerInvoiceRequest,
) -> AppResult<OwnerInvoiceView>
where
    S: LedgerStore + ?Sized,
{
    let (amount, amenities) = request.charges_for(unit);

    if request.overwrite {
        if let Some(existing) = store
            .find_first_invoice_for_month(unit.id, request.month)
            .await?
        {
            let revision = ChargeRevision {
                amount,
                amenities,
                description: request.description.clone(),
                due_date: request.due_date,
            };
            let revised = store.revise_invoice_charges(existing.id, &revision).await?;
            tracing::info!(invoice_id = %revised.id, month = %request.month, "Overwrote invoice charges");
            return Ok(OwnerInvoiceView::new(revised, unit));
        }
    }

    let draft = InvoiceDraft {
        unit_id: unit.id,
        month: request.month,
        amount,
        amenities,
        status: InvoiceStatus::Due,
        origin: InvoiceOrigin::Owner,
        description: request.description.clone(),
        due_date: request.due_date,
    };
    let invoice = store.insert_invoice(&draft).await?;
    Ok(OwnerInvoiceView::new(invoice, unit))
}

/// The unit's tenant may report a payment; only the owner may verify it.
pub fn authorize_payment_update(
    unit: &UnitSnapshot,
    actor: &AuthUser,
    update: &PaymentUpdate,
) -> AppResult<()> {
    if actor.role == Role::Owner && unit.owner_id == actor.id {
        return Ok(());
    }
    if actor.role == Role::Tenant && unit.tenant_id == Some(actor.id) {
        if update.action.is_some() {
            return Err(AppError::Forbidden(
                "Forbidden: only the owner can verify a payment.".to_string(),
            ));
        }
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: you cannot update this invoice.".to_string(),
    ))
}

pub async fn record_payment<S>(
    store: &S,
    actor: &AuthUser,
    invoice_id: Uuid,
    update: &PaymentUpdate,
) -> AppResult<PaymentOutcome>
where
    S: LedgerStore + ?Sized,
{
    if update.is_empty() {
        return Err(AppError::BadRequest(
            "Provide at least one of status, txnId, screenshot or action.".to_string(),
        ));
    }

    let invoice = store
        .find_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;
    let unit = store
        .find_unit(invoice.unit_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
    authorize_payment_update(&unit, actor, update)?;

    let outcome = store
        .apply_payment_update(invoice_id, update)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;

    tracing::debug!(
        invoice_id = %invoice_id,
        status = %outcome.invoice.status,
        actor_id = %actor.id,
        "Applied invoice update"
    );
    if let Some(history) = &outcome.history {
        tracing::info!(
            invoice_id = %invoice_id,
            payment_id = %history.id,
            amount = %history.amount,
            "Recorded payment"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{
        create_owner_invoices, enters_paid, ensure_monthly_invoice, record_payment, AmenityCharge,
        InvoiceAction, InvoiceOrigin, InvoiceStatus, InvoiceTarget, OwnerInvoiceRequest,
        PaymentUpdate,
    };
    use crate::{
        auth::{AuthUser, Role},
        error::AppError,
        repository::{ledger_store::LedgerStore, memory_store::MemoryLedgerStore},
        services::billing_month::BillingMonth,
        tenancy::{UnitAmenity, UnitSnapshot},
    };

    fn month(raw: &str) -> BillingMonth {
        raw.parse().expect("month")
    }

    fn amenity(name: &str, cost: i64) -> UnitAmenity {
        UnitAmenity {
            name: name.to_string(),
            cost: Decimal::new(cost, 0),
        }
    }

    fn occupied_unit(owner_id: Uuid, tenant_id: Uuid) -> UnitSnapshot {
        UnitSnapshot {
            id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            owner_id,
            number: "101".to_string(),
            rent: Decimal::new(10_000, 0),
            tenant_id: Some(tenant_id),
            tenant_name: Some("Asha".to_string()),
            tenant_added_at: Some(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()),
            amenities: vec![amenity("Water", 500), amenity("", 0)],
        }
    }

    fn owner_request(target: InvoiceTarget) -> OwnerInvoiceRequest {
        OwnerInvoiceRequest {
            target,
            month: month("2025-03"),
            amount: None,
            amenities: None,
            description: None,
            due_date: None,
            overwrite: false,
        }
    }

    #[tokio::test]
    async fn monthly_invoice_bills_rent_plus_billable_amenities() {
        let store = MemoryLedgerStore::default();
        let unit = occupied_unit(Uuid::new_v4(), Uuid::new_v4());
        store.put_unit(unit.clone());

        let invoice = ensure_monthly_invoice(&store, &unit, month("2025-02"))
            .await
            .expect("invoice");

        assert_eq!(invoice.amount, Decimal::new(10_500, 0));
        assert_eq!(invoice.amenities.len(), 1);
        assert_eq!(invoice.amenities[0].name, "Water");
        assert_eq!(invoice.amenities[0].cost, Decimal::new(500, 0));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.action, InvoiceAction::Pending);
        assert_eq!(invoice.origin, Some(InvoiceOrigin::Monthly));
    }

    #[tokio::test]
    async fn monthly_generation_is_idempotent() {
        let store = MemoryLedgerStore::default();
        let mut unit = occupied_unit(Uuid::new_v4(), Uuid::new_v4());
        store.put_unit(unit.clone());

        let first = ensure_monthly_invoice(&store, &unit, month("2025-02"))
            .await
            .expect("first");
        store
            .apply_payment_update(
                first.id,
                &PaymentUpdate {
                    status: Some(InvoiceStatus::Paid),
                    ..PaymentUpdate::default()
                },
            )
            .await
            .expect("mark paid")
            .expect("invoice exists");

        unit.rent = Decimal::new(15_000, 0);
        unit.amenities = vec![amenity("Electricity", 900)];
        store.put_unit(unit.clone());

        let second = ensure_monthly_invoice(&store, &unit, month("2025-02"))
            .await
            .expect("second");
        let (third, fourth) = tokio::join!(
            ensure_monthly_invoice(&store, &unit, month("2025-02")),
            ensure_monthly_invoice(&store, &unit, month("2025-02")),
        );

        assert_eq!(second.id, first.id);
        assert_eq!(second.amount, Decimal::new(10_500, 0));
        assert_eq!(second.amenities, first.amenities);
        assert_eq!(second.status, InvoiceStatus::Paid);
        assert_eq!(third.expect("third").id, first.id);
        assert_eq!(fourth.expect("fourth").id, first.id);
        assert_eq!(store.invoice_count(), 1);
    }

    #[tokio::test]
    async fn monthly_generation_rejects_vacant_units_and_months_before_tenancy() {
        let store = MemoryLedgerStore::default();
        let mut unit = occupied_unit(Uuid::new_v4(), Uuid::new_v4());

        let early = ensure_monthly_invoice(&store, &unit, month("2024-12")).await;
        assert!(matches!(early, Err(AppError::BadRequest(_))));

        unit.tenant_id = None;
        let vacant = ensure_monthly_invoice(&store, &unit, month("2025-02")).await;
        assert!(matches!(vacant, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn owner_invoices_may_duplicate_and_use_explicit_amounts() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let unit = occupied_unit(owner_id, Uuid::new_v4());
        store.put_unit(unit.clone());
        ensure_monthly_invoice(&store, &unit, month("2025-03"))
            .await
            .expect("monthly");

        let mut request = owner_request(InvoiceTarget::Unit(unit.id));
        request.amount = Some(Decimal::new(12_345, 0));
        let created = create_owner_invoices(&store, owner_id, &request)
            .await
            .expect("owner invoice");

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].invoice.amount, Decimal::new(12_345, 0));
        assert_eq!(created[0].invoice.status, InvoiceStatus::Due);
        assert_eq!(created[0].invoice.origin, Some(InvoiceOrigin::Owner));
        assert_eq!(created[0].tenant_name, "Asha");
        assert_eq!(created[0].unit_number, "101");

        create_owner_invoices(&store, owner_id, &request)
            .await
            .expect("duplicate owner invoice");
        let march = store
            .list_invoices_for_units(&[unit.id])
            .await
            .expect("list")
            .into_iter()
            .filter(|invoice| invoice.month == month("2025-03"))
            .count();
        assert_eq!(march, 3);
    }

    #[tokio::test]
    async fn overwrite_revises_the_first_invoice_of_the_month() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let unit = occupied_unit(owner_id, Uuid::new_v4());
        store.put_unit(unit.clone());
        let monthly = ensure_monthly_invoice(&store, &unit, month("2025-03"))
            .await
            .expect("monthly");

        let mut first = owner_request(InvoiceTarget::Unit(unit.id));
        first.description = Some("March rent".to_string());
        first.overwrite = true;
        create_owner_invoices(&store, owner_id, &first)
            .await
            .expect("first overwrite");

        let mut second = owner_request(InvoiceTarget::Unit(unit.id));
        second.amenities = Some(vec![
            AmenityCharge {
                name: "Electricity".to_string(),
                cost: Decimal::new(750, 0),
                description: None,
            },
            AmenityCharge {
                name: String::new(),
                cost: Decimal::new(99, 0),
                description: None,
            },
        ]);
        second.overwrite = true;
        let revised = create_owner_invoices(&store, owner_id, &second)
            .await
            .expect("second overwrite");

        assert_eq!(revised[0].invoice.id, monthly.id);
        assert_eq!(revised[0].invoice.amount, Decimal::new(10_849, 0));
        assert_eq!(revised[0].invoice.amenities.len(), 2);
        assert_eq!(revised[0].invoice.description.as_deref(), Some("March rent"));
        assert_eq!(revised[0].invoice.status, InvoiceStatus::Pending);
        assert_eq!(revised[0].invoice.origin, Some(InvoiceOrigin::Monthly));
        assert_eq!(
            store
                .list_invoices_for_units(&[unit.id])
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn supplied_charges_are_billed_even_without_a_name() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let unit = occupied_unit(owner_id, Uuid::new_v4());
        store.put_unit(unit.clone());

        let mut request = owner_request(InvoiceTarget::Unit(unit.id));
        request.amenities = Some(vec![AmenityCharge {
            name: String::new(),
            cost: Decimal::new(2_000, 0),
            description: Some("damage fee".to_string()),
        }]);
        let created = create_owner_invoices(&store, owner_id, &request)
            .await
            .expect("owner invoice");

        let invoice = &created[0].invoice;
        assert_eq!(invoice.amount, Decimal::new(12_000, 0));
        assert_eq!(invoice.amenities.len(), 1);
        assert_eq!(invoice.amenities[0].cost, Decimal::new(2_000, 0));
        assert_eq!(
            invoice.amenities[0].description.as_deref(),
            Some("damage fee")
        );
    }

    #[tokio::test]
    async fn property_target_without_units_creates_nothing() {
        let store = MemoryLedgerStore::default();
        let (property_id, owner_id) = (Uuid::new_v4(), Uuid::new_v4());
        store.put_property(property_id, owner_id);

        let created = create_owner_invoices(
            &store,
            owner_id,
            &owner_request(InvoiceTarget::Property(property_id)),
        )
        .await
        .expect("empty batch");
        assert!(created.is_empty());

        let stranger = create_owner_invoices(
            &store,
            Uuid::new_v4(),
            &owner_request(InvoiceTarget::Property(property_id)),
        )
        .await;
        assert!(matches!(stranger, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn owner_invoice_checks_ownership_and_tenancy() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let mut unit = occupied_unit(owner_id, Uuid::new_v4());
        store.put_unit(unit.clone());

        let stranger = create_owner_invoices(
            &store,
            Uuid::new_v4(),
            &owner_request(InvoiceTarget::Unit(unit.id)),
        )
        .await;
        assert!(matches!(stranger, Err(AppError::Forbidden(_))));

        unit.tenant_id = None;
        store.put_unit(unit.clone());
        let vacant =
            create_owner_invoices(&store, owner_id, &owner_request(InvoiceTarget::Unit(unit.id)))
                .await;
        assert!(matches!(vacant, Err(AppError::BadRequest(_))));

        let missing = create_owner_invoices(
            &store,
            owner_id,
            &owner_request(InvoiceTarget::Unit(Uuid::new_v4())),
        )
        .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn batch_targets_skip_vacant_units() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let occupied = occupied_unit(owner_id, Uuid::new_v4());
        let mut vacant = occupied_unit(owner_id, Uuid::new_v4());
        vacant.property_id = occupied.property_id;
        vacant.tenant_id = None;
        vacant.tenant_added_at = None;
        store.put_unit(occupied.clone());
        store.put_unit(vacant.clone());

        let by_property = create_owner_invoices(
            &store,
            owner_id,
            &owner_request(InvoiceTarget::Property(occupied.property_id)),
        )
        .await
        .expect("property batch");
        assert_eq!(by_property.len(), 1);
        assert_eq!(by_property[0].invoice.unit_id, occupied.id);

        let all = create_owner_invoices(&store, owner_id, &owner_request(InvoiceTarget::AllUnits))
            .await
            .expect("all batch");
        assert_eq!(all.len(), 1);

        let foreign = create_owner_invoices(
            &store,
            Uuid::new_v4(),
            &owner_request(InvoiceTarget::Property(occupied.property_id)),
        )
        .await;
        assert!(matches!(foreign, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn only_the_transition_into_paid_is_recorded() {
        assert!(enters_paid(InvoiceStatus::Pending, InvoiceStatus::Paid));
        assert!(enters_paid(InvoiceStatus::Due, InvoiceStatus::Paid));
        assert!(!enters_paid(InvoiceStatus::Paid, InvoiceStatus::Paid));
        assert!(!enters_paid(InvoiceStatus::Paid, InvoiceStatus::Due));
        assert!(!enters_paid(InvoiceStatus::Pending, InvoiceStatus::Due));
    }

    #[tokio::test]
    async fn paying_twice_appends_history_once() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let unit = occupied_unit(owner_id, tenant_id);
        store.put_unit(unit.clone());
        let invoice = ensure_monthly_invoice(&store, &unit, month("2025-02"))
            .await
            .expect("invoice");
        let tenant = AuthUser {
            id: tenant_id,
            role: Role::Tenant,
        };

        let paid = PaymentUpdate {
            status: Some(InvoiceStatus::Paid),
            txn_id: Some("TXN-1".to_string()),
            ..PaymentUpdate::default()
        };
        let first = record_payment(&store, &tenant, invoice.id, &paid)
            .await
            .expect("first payment");
        let history = first.history.expect("history entry");
        assert_eq!(history.amount, invoice.amount);
        assert_eq!(history.date, month("2025-02").first_day());
        assert_eq!(history.txn_id.as_deref(), Some("TXN-1"));
        assert_eq!(history.details.as_deref(), Some("Rent + amenities for 2025-02"));
        assert_eq!(first.invoice.status, InvoiceStatus::Paid);

        let second = record_payment(&store, &tenant, invoice.id, &paid)
            .await
            .expect("second payment");
        assert!(second.history.is_none());
        assert_eq!(
            store
                .list_payment_history(Some([unit.id].as_slice()))
                .await
                .expect("history")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn only_owners_verify_payments() {
        let store = MemoryLedgerStore::default();
        let owner_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let unit = occupied_unit(owner_id, tenant_id);
        store.put_unit(unit.clone());
        let invoice = ensure_monthly_invoice(&store, &unit, month("2025-02"))
            .await
            .expect("invoice");
        let verify = PaymentUpdate {
            action: Some(InvoiceAction::Verified),
            ..PaymentUpdate::default()
        };

        let tenant = AuthUser {
            id: tenant_id,
            role: Role::Tenant,
        };
        let denied = record_payment(&store, &tenant, invoice.id, &verify).await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let owner = AuthUser {
            id: owner_id,
            role: Role::Owner,
        };
        let verified = record_payment(&store, &owner, invoice.id, &verify)
            .await
            .expect("verified");
        assert_eq!(verified.invoice.action, InvoiceAction::Verified);
        assert_eq!(verified.invoice.status, InvoiceStatus::Pending);
        assert!(verified.history.is_none());
    }

    #[tokio::test]
    async fn payment_update_validation() {
        let store = MemoryLedgerStore::default();
        let owner = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Owner,
        };

        let empty = record_payment(&store, &owner, Uuid::new_v4(), &PaymentUpdate::default()).await;
        assert!(matches!(empty, Err(AppError::BadRequest(_))));

        let update = PaymentUpdate {
            status: Some(InvoiceStatus::Paid),
            ..PaymentUpdate::default()
        };
        let missing = record_payment(&store, &owner, Uuid::new_v4(), &update).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[test]
    fn serializes_camel_case_wire_shape() {
        let invoice = super::InvoiceRecord {
            id: Uuid::nil(),
            unit_id: Uuid::nil(),
            month: month("2025-01"),
            amount: Decimal::new(10_500, 0),
            amenities: Vec::new(),
            status: InvoiceStatus::Due,
            action: InvoiceAction::Pending,
            origin: Some(InvoiceOrigin::Owner),
            screenshot: None,
            txn_id: Some("T-9".to_string()),
            description: None,
            due_date: None,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&invoice).expect("json");
        assert_eq!(value["unitId"], serde_json::json!(Uuid::nil().to_string()));
        assert_eq!(value["month"], "2025-01");
        assert_eq!(value["status"], "due");
        assert_eq!(value["origin"], "owner");
        assert_eq!(value["txnId"], "T-9");
        assert!(value.get("screenshot").is_none());
    }
}
