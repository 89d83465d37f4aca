use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{build_pool, db_pool},
    error::AppResult,
    repository::ledger_store::PgLedgerStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, sqlx::Error> {
        let db_pool = match config.database_url.as_deref() {
            Some(url) => Some(build_pool(&config, url)?),
            None => None,
        };
        Ok(Self {
            config: Arc::new(config),
            db_pool,
        })
    }

    pub fn ledger(&self) -> AppResult<PgLedgerStore> {
        Ok(PgLedgerStore::new(db_pool(self)?.clone()))
    }
}
