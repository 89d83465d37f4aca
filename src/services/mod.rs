pub mod admin_bootstrap;
pub mod billing_month;
pub mod invoice_ledger;
pub mod passwords;
pub mod reconciliation;
