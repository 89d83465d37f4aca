use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    state::AppState,
};

/// Connections are opened on first use so the service can boot (and report
/// a degraded health check) while the database is still coming up.
pub fn build_pool(config: &AppConfig, url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(
            config
                .db_pool_min_connections
                .min(config.db_pool_max_connections),
        )
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect_lazy(url)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

pub fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

pub fn map_db_error(error: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            Some("23505") => {
                tracing::warn!(db_error = %db_error, "Unique constraint violated");
                return AppError::Conflict(
                    "Duplicate value violates a unique constraint.".to_string(),
                );
            }
            Some("23503") => {
                tracing::warn!(db_error = %db_error, "Foreign key constraint violated");
                return AppError::Conflict(
                    "Record is referenced by, or references, a missing record.".to_string(),
                );
            }
            Some("23514") | Some("22P02") => {
                tracing::warn!(db_error = %db_error, "Rejected by column constraint");
                return AppError::BadRequest("Value rejected by a column constraint.".to_string());
            }
            _ => {}
        }
    }
    tracing::error!(db_error = %error, "Database query failed");
    AppError::Dependency("Database operation failed.".to_string())
}
