use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    repository::ledger_store::LedgerStore,
    services::{
        billing_month::BillingMonth,
        invoice_ledger::{
            enters_paid, ChargeRevision, InvoiceAction, InvoiceDraft, InvoiceOrigin,
            InvoiceRecord, PaymentHistoryDraft, PaymentHistoryRecord, PaymentOutcome,
            PaymentUpdate,
        },
    },
    tenancy::UnitSnapshot,
};

/// In-process ledger used by unit tests. A single mutex serializes every
/// operation, which gives the same atomicity the database provides.
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    clock: DateTime<Utc>,
    /// Property id to owner id.
    properties: HashMap<Uuid, Uuid>,
    units: Vec<UnitSnapshot>,
    invoices: Vec<InvoiceRecord>,
    history: Vec<PaymentHistoryRecord>,
}

impl MemoryState {
    /// Strictly increasing timestamps keep creation order observable.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::milliseconds(1);
        self.clock
    }

    fn record_from(&mut self, draft: &InvoiceDraft) -> InvoiceRecord {
        let now = self.tick();
        let record = InvoiceRecord {
            id: Uuid::new_v4(),
            unit_id: draft.unit_id,
            month: draft.month,
            amount: draft.amount,
            amenities: draft.amenities.clone(),
            status: draft.status,
            action: InvoiceAction::Pending,
            origin: Some(draft.origin),
            screenshot: None,
            txn_id: None,
            description: draft.description.clone(),
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
        };
        self.invoices.push(record.clone());
        record
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                clock: Utc::now(),
                properties: HashMap::new(),
                units: Vec::new(),
                invoices: Vec::new(),
                history: Vec::new(),
            }),
        }
    }
}

impl MemoryLedgerStore {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory ledger lock")
    }

    pub fn put_property(&self, property_id: Uuid, owner_id: Uuid) {
        self.lock().properties.insert(property_id, owner_id);
    }

    pub fn put_unit(&self, unit: UnitSnapshot) {
        let mut state = self.lock();
        state
            .properties
            .entry(unit.property_id)
            .or_insert(unit.owner_id);
        state.units.retain(|existing| existing.id != unit.id);
        state.units.push(unit);
    }

    pub fn put_invoice(&self, invoice: InvoiceRecord) {
        self.lock().invoices.push(invoice);
    }

    pub fn invoice_count(&self) -> usize {
        self.lock().invoices.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_unit(&self, unit_id: Uuid) -> AppResult<Option<UnitSnapshot>> {
        Ok(self.lock().units.iter().find(|unit| unit.id == unit_id).cloned())
    }

    async fn find_unit_by_tenant(&self, tenant_id: Uuid) -> AppResult<Option<UnitSnapshot>> {
        Ok(self
            .lock()
            .units
            .iter()
            .find(|unit| unit.tenant_id == Some(tenant_id))
            .cloned())
    }

    async fn list_owner_units(&self, owner_id: Uuid) -> AppResult<Vec<UnitSnapshot>> {
        Ok(self
            .lock()
            .units
            .iter()
            .filter(|unit| unit.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_property_units(&self, property_id: Uuid) -> AppResult<Vec<UnitSnapshot>> {
        Ok(self
            .lock()
            .units
            .iter()
            .filter(|unit| unit.property_id == property_id)
            .cloned()
            .collect())
    }

    async fn find_property_owner(&self, property_id: Uuid) -> AppResult<Option<Uuid>> {
        Ok(self.lock().properties.get(&property_id).copied())
    }

    async fn insert_monthly_invoice_if_absent(
        &self,
        draft: &InvoiceDraft,
    ) -> AppResult<InvoiceRecord> {
        let mut state = self.lock();
        let existing = state.invoices.iter().find(|invoice| {
            invoice.unit_id == draft.unit_id
                && invoice.month == draft.month
                && invoice.origin == Some(InvoiceOrigin::Monthly)
        });
        if let Some(invoice) = existing {
            return Ok(invoice.clone());
        }
        Ok(state.record_from(draft))
    }

    async fn insert_invoice(&self, draft: &InvoiceDraft) -> AppResult<InvoiceRecord> {
        let mut state = self.lock();
        if draft.origin == InvoiceOrigin::Monthly
            && state.invoices.iter().any(|invoice| {
                invoice.unit_id == draft.unit_id
                    && invoice.month == draft.month
                    && invoice.origin == Some(InvoiceOrigin::Monthly)
            })
        {
            return Err(AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            ));
        }
        Ok(state.record_from(draft))
    }

    async fn find_invoice(&self, invoice_id: Uuid) -> AppResult<Option<InvoiceRecord>> {
        Ok(self
            .lock()
            .invoices
            .iter()
            .find(|invoice| invoice.id == invoice_id)
            .cloned())
    }

    async fn find_first_invoice_for_month(
        &self,
        unit_id: Uuid,
        month: BillingMonth,
    ) -> AppResult<Option<InvoiceRecord>> {
        Ok(self
            .lock()
            .invoices
            .iter()
            .filter(|invoice| invoice.unit_id == unit_id && invoice.month == month)
            .min_by_key(|invoice| invoice.created_at)
            .cloned())
    }

    async fn revise_invoice_charges(
        &self,
        invoice_id: Uuid,
        revision: &ChargeRevision,
    ) -> AppResult<InvoiceRecord> {
        let mut state = self.lock();
        let now = state.tick();
        let invoice = state
            .invoices
            .iter_mut()
            .find(|invoice| invoice.id == invoice_id)
            .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;
        invoice.amount = revision.amount;
        invoice.amenities = revision.amenities.clone();
        if let Some(description) = &revision.description {
            invoice.description = Some(description.clone());
        }
        if let Some(due_date) = revision.due_date {
            invoice.due_date = Some(due_date);
        }
        invoice.updated_at = now;
        Ok(invoice.clone())
    }

    async fn list_invoices_for_units(&self, unit_ids: &[Uuid]) -> AppResult<Vec<InvoiceRecord>> {
        let mut invoices = self
            .lock()
            .invoices
            .iter()
            .filter(|invoice| unit_ids.contains(&invoice.unit_id))
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by(|left, right| {
            left.month
                .cmp(&right.month)
                .then(left.created_at.cmp(&right.created_at))
        });
        Ok(invoices)
    }

    async fn apply_payment_update(
        &self,
        invoice_id: Uuid,
        update: &PaymentUpdate,
    ) -> AppResult<Option<PaymentOutcome>> {
        let mut state = self.lock();
        let now = state.tick();
        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|invoice| invoice.id == invoice_id)
        else {
            return Ok(None);
        };
        let prior_status = invoice.status;
        update.apply_to(invoice, now);
        let invoice = invoice.clone();

        let history = enters_paid(prior_status, invoice.status).then(|| {
            let draft = PaymentHistoryDraft::for_paid_invoice(&invoice);
            PaymentHistoryRecord {
                id: Uuid::new_v4(),
                unit_id: Some(draft.unit_id),
                invoice_id: Some(draft.invoice_id),
                amount: draft.amount,
                date: draft.date,
                screenshot: draft.screenshot,
                txn_id: draft.txn_id,
                status: "paid".to_string(),
                details: Some(draft.details),
                created_at: now,
            }
        });
        if let Some(record) = &history {
            state.history.push(record.clone());
        }
        Ok(Some(PaymentOutcome { invoice, history }))
    }

    async fn list_payment_history(
        &self,
        unit_ids: Option<&[Uuid]>,
    ) -> AppResult<Vec<PaymentHistoryRecord>> {
        let mut history = self
            .lock()
            .history
            .iter()
            .filter(|record| match unit_ids {
                Some(ids) => record.unit_id.is_some_and(|unit_id| ids.contains(&unit_id)),
                None => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        history.sort_by(|left, right| {
            right
                .date
                .cmp(&left.date)
                .then(right.created_at.cmp(&left.created_at))
        });
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::MemoryLedgerStore;
    use crate::{repository::ledger_store::LedgerStore, tenancy::UnitSnapshot};

    #[tokio::test]
    async fn property_owner_resolves_without_units() {
        let store = MemoryLedgerStore::default();
        let (property_id, owner_id) = (Uuid::new_v4(), Uuid::new_v4());
        store.put_property(property_id, owner_id);

        assert_eq!(
            store.find_property_owner(property_id).await.expect("owner"),
            Some(owner_id)
        );
        assert!(store
            .list_property_units(property_id)
            .await
            .expect("units")
            .is_empty());
        assert_eq!(
            store
                .find_property_owner(Uuid::new_v4())
                .await
                .expect("owner"),
            None
        );
    }

    #[tokio::test]
    async fn registering_a_unit_records_its_property_owner() {
        let store = MemoryLedgerStore::default();
        let unit = UnitSnapshot {
            id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            number: "2B".to_string(),
            rent: Decimal::new(8_000, 0),
            tenant_id: None,
            tenant_name: None,
            tenant_added_at: Some(Utc::now()),
            amenities: Vec::new(),
        };
        store.put_unit(unit.clone());

        assert_eq!(
            store
                .find_property_owner(unit.property_id)
                .await
                .expect("owner"),
            Some(unit.owner_id)
        );
    }
}
