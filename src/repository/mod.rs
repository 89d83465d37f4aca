pub mod ledger_store;
#[cfg(test)]
pub mod memory_store;
pub mod table_service;
