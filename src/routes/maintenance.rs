use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    auth::{require_role, require_user, Role},
    db::db_pool,
    error::{AppError, AppResult},
    repository::{
        ledger_store::LedgerStore,
        table_service::{create_row, get_row, list_rows, update_row},
    },
    routes::{authorize_unit_owner, role_scope_filters},
    schemas::{
        check_status, clamp_limit, validate_input, CreateMaintenanceInput, ListQuery,
        MaintenancePath, UpdateStatusInput, MAINTENANCE_STATUSES,
    },
    state::AppState,
    tenancy::assert_unit_reader,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/maintenance",
            axum::routing::get(list_requests).post(create_request),
        )
        .route(
            "/maintenance/{request_id}",
            axum::routing::get(get_request),
        )
        .route(
            "/maintenance/{request_id}/status",
            axum::routing::patch(update_request_status),
        )
}

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMaintenanceInput>,
) -> AppResult<impl IntoResponse> {
    let tenant = require_role(&state, &headers, Role::Tenant)?;
    validate_input(&payload)?;
    let store = state.ledger()?;
    let unit = store.find_unit_by_tenant(tenant.id).await?.ok_or_else(|| {
        AppError::BadRequest("You are not assigned to a unit.".to_string())
    })?;

    let mut record = Map::new();
    record.insert("unit_id".to_string(), Value::String(unit.id.to_string()));
    record.insert(
        "tenant_id".to_string(),
        Value::String(tenant.id.to_string()),
    );
    record.insert(
        "description".to_string(),
        Value::String(payload.description.trim().to_string()),
    );
    if let Some(image) = payload.image.filter(|image| !image.trim().is_empty()) {
        record.insert("image".to_string(), Value::String(image));
    }

    let created = create_row(db_pool(&state)?, "maintenance_requests", &record).await?;
    let request_id = created
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    tracing::info!(
        unit_id = %unit.id,
        request_id = %request_id,
        "Maintenance request opened"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;
    let filters = role_scope_filters(&store, &user).await?;

    let rows = list_rows(
        db_pool(&state)?,
        "maintenance_requests",
        filters.as_ref(),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_request(
    State(state): State<AppState>,
    Path(path): Path<MaintenancePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;
    let record = get_row(
        db_pool(&state)?,
        "maintenance_requests",
        &path.request_id.to_string(),
        "id",
    )
    .await?;

    let unit = store
        .find_unit(request_unit_id(&record)?)
        .await?
        .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
    assert_unit_reader(&unit, &user)?;
    Ok(Json(record))
}

async fn update_request_status(
    State(state): State<AppState>,
    Path(path): Path<MaintenancePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateStatusInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let status = check_status(&payload.status, MAINTENANCE_STATUSES)?;
    let store = state.ledger()?;
    let pool = db_pool(&state)?;

    let record = get_row(
        pool,
        "maintenance_requests",
        &path.request_id.to_string(),
        "id",
    )
    .await?;
    if !user.is_admin() {
        authorize_unit_owner(&store, request_unit_id(&record)?, &user).await?;
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(status));
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    let updated = update_row(
        pool,
        "maintenance_requests",
        &path.request_id.to_string(),
        &patch,
        "id",
    )
    .await?;
    Ok(Json(updated))
}

fn request_unit_id(record: &Value) -> AppResult<Uuid> {
    record
        .get("unit_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| AppError::Internal("Maintenance request has no unit.".to_string()))
}
