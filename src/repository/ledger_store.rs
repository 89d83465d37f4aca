use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    db::map_db_error,
    error::{AppError, AppResult},
    services::{
        billing_month::BillingMonth,
        invoice_ledger::{
            enters_paid, AmenityCharge, ChargeRevision, InvoiceDraft, InvoiceRecord,
            PaymentHistoryDraft, PaymentHistoryRecord, PaymentOutcome, PaymentUpdate,
        },
    },
    tenancy::{UnitAmenity, UnitSnapshot},
};

/// Persistence seam for the invoice ledger and the reconciliation reads.
///
/// Implementations must make `insert_monthly_invoice_if_absent` atomic per
/// `(unit, month)` and must apply a payment update and its history entry as
/// one unit of work.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_unit(&self, unit_id: Uuid) -> AppResult<Option<UnitSnapshot>>;

    async fn find_unit_by_tenant(&self, tenant_id: Uuid) -> AppResult<Option<UnitSnapshot>>;

    async fn list_owner_units(&self, owner_id: Uuid) -> AppResult<Vec<UnitSnapshot>>;

    async fn list_property_units(&self, property_id: Uuid) -> AppResult<Vec<UnitSnapshot>>;

    async fn find_property_owner(&self, property_id: Uuid) -> AppResult<Option<Uuid>>;

    /// Returns the monthly invoice for the draft's `(unit, month)`, inserting
    /// it only when none exists. An existing record is never modified.
    async fn insert_monthly_invoice_if_absent(
        &self,
        draft: &InvoiceDraft,
    ) -> AppResult<InvoiceRecord>;

    async fn insert_invoice(&self, draft: &InvoiceDraft) -> AppResult<InvoiceRecord>;

    async fn find_invoice(&self, invoice_id: Uuid) -> AppResult<Option<InvoiceRecord>>;

    /// Earliest-created invoice of any origin for the month.
    async fn find_first_invoice_for_month(
        &self,
        unit_id: Uuid,
        month: BillingMonth,
    ) -> AppResult<Option<InvoiceRecord>>;

    async fn revise_invoice_charges(
        &self,
        invoice_id: Uuid,
        revision: &ChargeRevision,
    ) -> AppResult<InvoiceRecord>;

    /// All invoices of the units, ordered by month then creation time.
    async fn list_invoices_for_units(&self, unit_ids: &[Uuid]) -> AppResult<Vec<InvoiceRecord>>;

    /// `None` when the invoice does not exist.
    async fn apply_payment_update(
        &self,
        invoice_id: Uuid,
        update: &PaymentUpdate,
    ) -> AppResult<Option<PaymentOutcome>>;

    /// Newest first. `None` lists every entry.
    async fn list_payment_history(
        &self,
        unit_ids: Option<&[Uuid]>,
    ) -> AppResult<Vec<PaymentHistoryRecord>>;
}

const UNIT_SELECT: &str = r#"
    SELECT u.id, u.property_id, p.owner_id, u.number, u.rent, u.tenant_id,
        t.name AS tenant_name, u.tenant_added_at, u.amenities
    FROM units u
    JOIN properties p ON p.id = u.property_id
    LEFT JOIN users t ON t.id = u.tenant_id
"#;

const INVOICE_COLUMNS: &str = "id, unit_id, month, amount, amenities, status, action, origin, \
    screenshot, txn_id, description, due_date, created_at, updated_at";

const HISTORY_COLUMNS: &str =
    "id, unit_id, invoice_id, amount, date, screenshot, txn_id, status, details, created_at";

#[derive(sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    property_id: Uuid,
    owner_id: Uuid,
    number: String,
    rent: Decimal,
    tenant_id: Option<Uuid>,
    tenant_name: Option<String>,
    tenant_added_at: Option<DateTime<Utc>>,
    amenities: Json<Vec<UnitAmenity>>,
}

impl From<UnitRow> for UnitSnapshot {
    fn from(row: UnitRow) -> Self {
        Self {
            id: row.id,
            property_id: row.property_id,
            owner_id: row.owner_id,
            number: row.number,
            rent: row.rent,
            tenant_id: row.tenant_id,
            tenant_name: row.tenant_name,
            tenant_added_at: row.tenant_added_at,
            amenities: row.amenities.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    unit_id: Uuid,
    month: String,
    amount: Decimal,
    amenities: Json<Vec<AmenityCharge>>,
    status: String,
    action: String,
    origin: Option<String>,
    screenshot: Option<String>,
    txn_id: Option<String>,
    description: Option<String>,
    due_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for InvoiceRecord {
    type Error = AppError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt =
            |detail: String| AppError::Internal(format!("Stored invoice {id} is malformed: {detail}"));
        Ok(Self {
            id,
            unit_id: row.unit_id,
            month: row
                .month
                .parse()
                .map_err(|error| corrupt(format!("{error}")))?,
            amount: row.amount,
            amenities: row.amenities.0,
            status: row.status.parse().map_err(|error| corrupt(format!("{error}")))?,
            action: row.action.parse().map_err(|error| corrupt(format!("{error}")))?,
            origin: row
                .origin
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|error| corrupt(format!("{error}")))?,
            screenshot: row.screenshot,
            txn_id: row.txn_id,
            description: row.description,
            due_date: row.due_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<InvoiceRow>) -> AppResult<Vec<InvoiceRecord>> {
    rows.into_iter().map(InvoiceRecord::try_from).collect()
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_units(&self, filter: &str, id: Uuid) -> AppResult<Vec<UnitSnapshot>> {
        let sql = format!("{UNIT_SELECT} WHERE {filter} ORDER BY u.created_at, u.id");
        let rows = sqlx::query_as::<_, UnitRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().map(UnitSnapshot::from).collect())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_unit(&self, unit_id: Uuid) -> AppResult<Option<UnitSnapshot>> {
        Ok(self.fetch_units("u.id = $1", unit_id).await?.into_iter().next())
    }

    async fn find_unit_by_tenant(&self, tenant_id: Uuid) -> AppResult<Option<UnitSnapshot>> {
        Ok(self
            .fetch_units("u.tenant_id = $1", tenant_id)
            .await?
            .into_iter()
            .next())
    }

    async fn list_owner_units(&self, owner_id: Uuid) -> AppResult<Vec<UnitSnapshot>> {
        self.fetch_units("p.owner_id = $1", owner_id).await
    }

    async fn list_property_units(&self, property_id: Uuid) -> AppResult<Vec<UnitSnapshot>> {
        self.fetch_units("u.property_id = $1", property_id).await
    }

    async fn find_property_owner(&self, property_id: Uuid) -> AppResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT owner_id FROM properties WHERE id = $1")
            .bind(property_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn insert_monthly_invoice_if_absent(
        &self,
        draft: &InvoiceDraft,
    ) -> AppResult<InvoiceRecord> {
        let insert = format!(
            r#"
            INSERT INTO invoices (unit_id, month, amount, amenities, status, action, origin)
            VALUES ($1, $2, $3, $4, $5, 'pending', 'monthly')
            ON CONFLICT (unit_id, month) WHERE origin = 'monthly' DO NOTHING
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, InvoiceRow>(&insert)
            .bind(draft.unit_id)
            .bind(draft.month.to_string())
            .bind(draft.amount)
            .bind(Json(&draft.amenities))
            .bind(draft.status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        if let Some(row) = inserted {
            let invoice = InvoiceRecord::try_from(row)?;
            tracing::info!(
                invoice_id = %invoice.id,
                unit_id = %invoice.unit_id,
                month = %invoice.month,
                "Generated monthly invoice"
            );
            return Ok(invoice);
        }

        // Lost the race or already present; this statement sees the winner.
        let select = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE unit_id = $1 AND month = $2 AND origin = 'monthly'"
        );
        let existing = sqlx::query_as::<_, InvoiceRow>(&select)
            .bind(draft.unit_id)
            .bind(draft.month.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "Monthly invoice for unit {} month {} vanished after conflict.",
                    draft.unit_id, draft.month
                ))
            })?;
        InvoiceRecord::try_from(existing)
    }

    async fn insert_invoice(&self, draft: &InvoiceDraft) -> AppResult<InvoiceRecord> {
        let sql = format!(
            r#"
            INSERT INTO invoices
                (unit_id, month, amount, amenities, status, action, origin, description, due_date)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8)
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(draft.unit_id)
            .bind(draft.month.to_string())
            .bind(draft.amount)
            .bind(Json(&draft.amenities))
            .bind(draft.status.as_str())
            .bind(draft.origin.as_str())
            .bind(draft.description.as_deref())
            .bind(draft.due_date)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        let invoice = InvoiceRecord::try_from(row)?;
        tracing::info!(
            invoice_id = %invoice.id,
            unit_id = %invoice.unit_id,
            month = %invoice.month,
            origin = draft.origin.as_str(),
            "Created invoice"
        );
        Ok(invoice)
    }

    async fn find_invoice(&self, invoice_id: Uuid) -> AppResult<Option<InvoiceRecord>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(InvoiceRecord::try_from)
            .transpose()
    }

    async fn find_first_invoice_for_month(
        &self,
        unit_id: Uuid,
        month: BillingMonth,
    ) -> AppResult<Option<InvoiceRecord>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE unit_id = $1 AND month = $2
             ORDER BY created_at ASC, id ASC
             LIMIT 1"
        );
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(unit_id)
            .bind(month.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .map(InvoiceRecord::try_from)
            .transpose()
    }

    async fn revise_invoice_charges(
        &self,
        invoice_id: Uuid,
        revision: &ChargeRevision,
    ) -> AppResult<InvoiceRecord> {
        let sql = format!(
            r#"
            UPDATE invoices
            SET amount = $2,
                amenities = $3,
                description = COALESCE($4, description),
                due_date = COALESCE($5, due_date),
                updated_at = now()
            WHERE id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_id)
            .bind(revision.amount)
            .bind(Json(&revision.amenities))
            .bind(revision.description.as_deref())
            .bind(revision.due_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;
        InvoiceRecord::try_from(row)
    }

    async fn list_invoices_for_units(&self, unit_ids: &[Uuid]) -> AppResult<Vec<InvoiceRecord>> {
        if unit_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE unit_id = ANY($1)
             ORDER BY month ASC, created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(unit_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        into_records(rows)
    }

    async fn apply_payment_update(
        &self,
        invoice_id: Uuid,
        update: &PaymentUpdate,
    ) -> AppResult<Option<PaymentOutcome>> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let lock = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query_as::<_, InvoiceRow>(&lock)
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
        else {
            return Ok(None);
        };
        let mut invoice = InvoiceRecord::try_from(row)?;
        let prior_status = invoice.status;
        update.apply_to(&mut invoice, Utc::now());

        let write = format!(
            r#"
            UPDATE invoices
            SET status = $2, txn_id = $3, screenshot = $4, action = $5, updated_at = now()
            WHERE id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&write)
            .bind(invoice_id)
            .bind(invoice.status.as_str())
            .bind(invoice.txn_id.as_deref())
            .bind(invoice.screenshot.as_deref())
            .bind(invoice.action.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;
        let invoice = InvoiceRecord::try_from(row)?;

        let history = if enters_paid(prior_status, invoice.status) {
            let draft = PaymentHistoryDraft::for_paid_invoice(&invoice);
            let insert = format!(
                r#"
                INSERT INTO payment_history
                    (unit_id, invoice_id, amount, date, screenshot, txn_id, status, details)
                VALUES ($1, $2, $3, $4, $5, $6, 'paid', $7)
                RETURNING {HISTORY_COLUMNS}
                "#
            );
            let record = sqlx::query_as::<_, PaymentHistoryRecord>(&insert)
                .bind(draft.unit_id)
                .bind(draft.invoice_id)
                .bind(draft.amount)
                .bind(draft.date)
                .bind(draft.screenshot.as_deref())
                .bind(draft.txn_id.as_deref())
                .bind(&draft.details)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_error)?;
            Some(record)
        } else {
            None
        };

        tx.commit().await.map_err(map_db_error)?;
        Ok(Some(PaymentOutcome { invoice, history }))
    }

    async fn list_payment_history(
        &self,
        unit_ids: Option<&[Uuid]>,
    ) -> AppResult<Vec<PaymentHistoryRecord>> {
        let rows = match unit_ids {
            Some([]) => Vec::new(),
            Some(ids) => {
                let sql = format!(
                    "SELECT {HISTORY_COLUMNS} FROM payment_history
                     WHERE unit_id = ANY($1)
                     ORDER BY date DESC, created_at DESC"
                );
                sqlx::query_as::<_, PaymentHistoryRecord>(&sql)
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_db_error)?
            }
            None => {
                let sql = format!(
                    "SELECT {HISTORY_COLUMNS} FROM payment_history
                     ORDER BY date DESC, created_at DESC"
                );
                sqlx::query_as::<_, PaymentHistoryRecord>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_db_error)?
            }
        };
        Ok(rows)
    }
}
