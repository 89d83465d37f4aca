use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    repository::ledger_store::LedgerStore,
    services::{
        billing_month::BillingMonth,
        invoice_ledger::{
            charges_total, ensure_monthly_invoice, unit_charges, AmenityCharge, InvoiceOrigin,
            InvoiceRecord, OwnerInvoiceView,
        },
    },
    tenancy::UnitSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmountBreakdown {
    pub rent: Decimal,
    pub amenities: Decimal,
    pub total: Decimal,
}

/// An invoice decorated with the unit's current pricing. The invoice's own
/// `amenities` snapshot stays authoritative for what was billed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitInvoiceView {
    #[serde(flatten)]
    pub invoice: InvoiceRecord,
    pub rent: Decimal,
    pub unit_amenities: Vec<AmenityCharge>,
    pub amount_breakdown: AmountBreakdown,
}

fn is_tenant_copy(invoice: &InvoiceRecord) -> bool {
    invoice.origin == Some(InvoiceOrigin::Tenant)
}

/// Lists a unit's invoices, first generating the monthly invoice for every
/// month of the tenancy (through the month of `today`) that has none.
pub async fn get_or_backfill_unit_invoices<S>(
    store: &S,
    unit: &UnitSnapshot,
    today: NaiveDate,
) -> AppResult<Vec<UnitInvoiceView>>
where
    S: LedgerStore + ?Sized,
{
    let mut by_month: BTreeMap<BillingMonth, Vec<InvoiceRecord>> = BTreeMap::new();
    for invoice in store.list_invoices_for_units(&[unit.id]).await? {
        if !is_tenant_copy(&invoice) {
            by_month.entry(invoice.month).or_default().push(invoice);
        }
    }

    if let Some(anchor) = unit.anchor_month() {
        let mut backfilled = 0usize;
        for month in anchor.through(BillingMonth::containing(today)) {
            if by_month.contains_key(&month) {
                continue;
            }
            let invoice = ensure_monthly_invoice(store, unit, month).await?;
            by_month.insert(month, vec![invoice]);
            backfilled += 1;
        }
        if backfilled > 0 {
            tracing::info!(unit_id = %unit.id, backfilled, "Backfilled monthly invoices");
        }
    }

    let unit_amenities = unit_charges(unit);
    let amenities_total = charges_total(&unit_amenities);
    let breakdown = AmountBreakdown {
        rent: unit.rent,
        amenities: amenities_total,
        total: unit.rent + amenities_total,
    };

    Ok(by_month
        .into_values()
        .flatten()
        .map(|invoice| UnitInvoiceView {
            invoice,
            rent: unit.rent,
            unit_amenities: unit_amenities.clone(),
            amount_breakdown: breakdown.clone(),
        })
        .collect())
}

/// A tenant without a unit simply has no invoices.
pub async fn list_tenant_invoices<S>(
    store: &S,
    tenant_id: Uuid,
    today: NaiveDate,
) -> AppResult<Vec<UnitInvoiceView>>
where
    S: LedgerStore + ?Sized,
{
    match store.find_unit_by_tenant(tenant_id).await? {
        Some(unit) => get_or_backfill_unit_invoices(store, &unit, today).await,
        None => Ok(Vec::new()),
    }
}

/// Ensures the current month is billed on each of the owner's occupied units,
/// then lists every invoice of those units, newest month first.
pub async fn ensure_current_and_list_owner_invoices<S>(
    store: &S,
    owner_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<Vec<OwnerInvoiceView>>
where
    S: LedgerStore + ?Sized,
{
    let units = store
        .list_owner_units(owner_id)
        .await?
        .into_iter()
        .filter(UnitSnapshot::is_occupied)
        .collect::<Vec<_>>();
    if units.is_empty() {
        return Ok(Vec::new());
    }

    let unit_ids = units.iter().map(|unit| unit.id).collect::<Vec<_>>();
    let mut invoices = store.list_invoices_for_units(&unit_ids).await?;
    let current = BillingMonth::of_timestamp(now);

    for unit in &units {
        let Some(added_at) = unit.tenant_added_at else {
            continue;
        };
        if added_at > now || BillingMonth::of_timestamp(added_at) > current {
            continue;
        }
        let billed = invoices.iter().any(|invoice| {
            invoice.unit_id == unit.id && invoice.month == current && !is_tenant_copy(invoice)
        });
        if billed {
            continue;
        }
        let invoice = ensure_monthly_invoice(store, unit, current).await?;
        if !invoices.iter().any(|existing| existing.id == invoice.id) {
            invoices.push(invoice);
        }
    }

    let units_by_id = units
        .iter()
        .map(|unit| (unit.id, unit))
        .collect::<HashMap<_, _>>();
    let mut views = invoices
        .into_iter()
        .filter_map(|invoice| {
            let unit = units_by_id.get(&invoice.unit_id)?;
            Some(OwnerInvoiceView::new(invoice, unit))
        })
        .collect::<Vec<_>>();
    views.sort_by(|left, right| {
        right
            .invoice
            .month
            .cmp(&left.invoice.month)
            .then(right.invoice.created_at.cmp(&left.invoice.created_at))
    });
    Ok(views)
}
