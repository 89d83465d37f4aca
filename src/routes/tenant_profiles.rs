use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::Value;

use crate::{
    auth::{require_role, require_user, Role},
    db::db_pool,
    error::{AppError, AppResult},
    repository::{
        ledger_store::LedgerStore,
        table_service::{find_row, upsert_row},
    },
    schemas::{
        remove_nulls, serialize_to_map, validate_input, UpsertTenantProfileInput, UserPath,
    },
    state::AppState,
    tenancy::assert_unit_owner,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenant-profiles/me",
            axum::routing::get(get_my_profile).put(upsert_my_profile),
        )
        .route(
            "/tenant-profiles/{user_id}",
            axum::routing::get(get_tenant_profile),
        )
}

async fn get_my_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let tenant = require_role(&state, &headers, Role::Tenant)?;
    let profile = find_row(
        db_pool(&state)?,
        "tenant_profiles",
        &tenant.id.to_string(),
        "user_id",
    )
    .await?;
    Ok(Json(profile.unwrap_or(Value::Null)))
}

async fn upsert_my_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpsertTenantProfileInput>,
) -> AppResult<Json<Value>> {
    let tenant = require_role(&state, &headers, Role::Tenant)?;
    validate_input(&payload)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "user_id".to_string(),
        Value::String(tenant.id.to_string()),
    );
    let saved = upsert_row(db_pool(&state)?, "tenant_profiles", &record, "user_id").await?;
    Ok(Json(saved))
}

/// Readable by the tenant, the admin and the owner of the tenant's unit.
async fn get_tenant_profile(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if !user.is_admin() && user.id != path.user_id {
        user.require_role(Role::Owner)?;
        let store = state.ledger()?;
        let unit = store.find_unit_by_tenant(path.user_id).await?.ok_or_else(|| {
            AppError::Forbidden(
                "Forbidden: this tenant does not rent from you.".to_string(),
            )
        })?;
        assert_unit_owner(&unit, &user)?;
    }

    let profile = find_row(
        db_pool(&state)?,
        "tenant_profiles",
        &path.user_id.to_string(),
        "user_id",
    )
    .await?;
    Ok(Json(profile.unwrap_or(Value::Null)))
}
