use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::AdminBootstrap, db::map_db_error, error::AppResult, services::passwords::hash_password,
};

/// Settles the bootstrap result at startup. With `fatal` set a failure stops
/// the server; otherwise it is logged and startup continues.
pub fn settle_bootstrap(result: AppResult<BootstrapOutcome>, fatal: bool) -> AppResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(error) if fatal => Err(error),
        Err(error) => {
            tracing::error!(error = %error, "Admin bootstrap failed");
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Created(Uuid),
    AlreadyPresent,
    EmailInUse,
    Skipped,
}

/// Creates the admin account when none exists. Safe to run on every start:
/// the partial unique index on `users.role` admits a single admin, so
/// concurrent starts cannot create two.
pub async fn ensure_admin(
    pool: &PgPool,
    credentials: Option<&AdminBootstrap>,
) -> AppResult<BootstrapOutcome> {
    let Some(credentials) = credentials else {
        tracing::info!("ADMIN_EMAIL/ADMIN_PASSWORD not set; skipping admin bootstrap");
        return Ok(BootstrapOutcome::Skipped);
    };

    let existing = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE role = 'admin' LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    if existing.is_some() {
        tracing::debug!("Admin account already present");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    let password_hash = hash_password(&credentials.password)?;
    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO users (name, email, password_hash, role)
        VALUES ($1, $2, $3, 'admin')
        ON CONFLICT DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&credentials.name)
    .bind(&credentials.email)
    .bind(&password_hash)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    match inserted {
        Some(id) => {
            tracing::info!(user_id = %id, email = %credentials.email, "Created admin account");
            Ok(BootstrapOutcome::Created(id))
        }
        None => {
            let admin_now = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM users WHERE role = 'admin')",
            )
            .fetch_one(pool)
            .await
            .map_err(map_db_error)?;
            if admin_now {
                Ok(BootstrapOutcome::AlreadyPresent)
            } else {
                tracing::warn!(
                    email = %credentials.email,
                    "Admin bootstrap email belongs to a non-admin account; no admin created"
                );
                Ok(BootstrapOutcome::EmailInUse)
            }
        }
    }
}
