use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

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
        check_status, clamp_limit, remove_nulls, serialize_to_map, validate_input,
        CreateTicketInput, ListQuery, TicketPath, UpdateStatusInput, TICKET_STATUSES,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tickets",
            axum::routing::get(list_tickets).post(create_ticket),
        )
        .route(
            "/tickets/{ticket_id}/status",
            axum::routing::patch(update_ticket_status),
        )
}

async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTicketInput>,
) -> AppResult<impl IntoResponse> {
    let tenant = require_role(&state, &headers, Role::Tenant)?;
    validate_input(&payload)?;
    let store = state.ledger()?;
    let unit = store.find_unit_by_tenant(tenant.id).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "tenant_id".to_string(),
        Value::String(tenant.id.to_string()),
    );
    if let Some(unit) = &unit {
        record.insert("unit_id".to_string(), Value::String(unit.id.to_string()));
    }
    let created = create_row(db_pool(&state)?, "tickets", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;
    let filters = role_scope_filters(&store, &user).await?;

    let rows = list_rows(
        db_pool(&state)?,
        "tickets",
        filters.as_ref(),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn update_ticket_status(
    State(state): State<AppState>,
    Path(path): Path<TicketPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateStatusInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let status = check_status(&payload.status, TICKET_STATUSES)?;
    let store = state.ledger()?;
    let pool = db_pool(&state)?;

    let ticket = get_row(pool, "tickets", &path.ticket_id.to_string(), "id").await?;
    if !user.is_admin() {
        let unit_id = ticket
            .get("unit_id")
            .and_then(Value::as_str)
            .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                AppError::Forbidden("Forbidden: ticket is not linked to your unit.".to_string())
            })?;
        authorize_unit_owner(&store, unit_id, &user).await?;
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(status));
    let updated = update_row(
        pool,
        "tickets",
        &path.ticket_id.to_string(),
        &patch,
        "id",
    )
    .await?;
    Ok(Json(updated))
}
