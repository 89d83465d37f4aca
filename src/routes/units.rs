use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::{
    auth::{require_role, require_user, AuthUser, Role},
    db::db_pool,
    error::{AppError, AppResult},
    repository::{
        ledger_store::{LedgerStore, PgLedgerStore},
        table_service::{create_row, delete_row, find_row, get_row, list_rows, update_row},
    },
    routes::auth::public_user,
    schemas::{
        check_amenities, check_rent, clamp_limit, remove_nulls, serialize_to_map, validate_input,
        AssignTenantInput, CreateUnitInput, ListQuery, PropertyPath, TenantPath, UnitPath,
        UpdateUnitInput,
    },
    services::{billing_month::BillingMonth, invoice_ledger::ensure_monthly_invoice},
    state::AppState,
    tenancy::{assert_unit_owner, load_owned_property, next_tenancy, Tenancy, UnitSnapshot},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/units", axum::routing::post(create_unit))
        .route("/units/mine", axum::routing::get(get_my_unit))
        .route("/units/owner-tenants", axum::routing::get(list_owner_tenants))
        .route(
            "/units/by-tenant/{tenant_id}",
            axum::routing::get(get_unit_by_tenant),
        )
        .route(
            "/units/{unit_id}",
            axum::routing::get(get_unit)
                .patch(update_unit)
                .delete(delete_unit),
        )
        .route(
            "/units/{unit_id}/tenant",
            axum::routing::put(assign_tenant),
        )
        .route(
            "/properties/{property_id}/units",
            axum::routing::get(list_property_units),
        )
        .route("/tenants", axum::routing::get(list_tenant_directory))
}

async fn create_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUnitInput>,
) -> AppResult<impl IntoResponse> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    validate_input(&payload)?;
    check_rent(payload.rent)?;
    check_amenities(&payload.amenities)?;
    let pool = db_pool(&state)?;
    load_owned_property(pool, payload.property_id, &owner).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "number".to_string(),
        Value::String(payload.number.trim().to_string()),
    );
    let created = create_row(pool, "units", &record).await?;
    tracing::info!(
        property_id = %payload.property_id,
        unit_id = %value_str(&created, "id"),
        "Created unit"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_property_units(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "property_id".to_string(),
        Value::String(path.property_id.to_string()),
    );
    let rows = list_rows(
        pool,
        "units",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "number",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers)?;
    let pool = db_pool(&state)?;
    let record = get_row(pool, "units", &path.unit_id.to_string(), "id").await?;
    Ok(Json(record))
}

async fn update_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUnitInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    validate_input(&payload)?;
    if let Some(rent) = payload.rent {
        check_rent(rent)?;
    }
    if let Some(amenities) = &payload.amenities {
        check_amenities(amenities)?;
    }
    let store = state.ledger()?;
    load_owned_unit(&store, path.unit_id, &user).await?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(
        db_pool(&state)?,
        "units",
        &path.unit_id.to_string(),
        &patch,
        "id",
    )
    .await?;
    Ok(Json(updated))
}

async fn delete_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;
    load_owned_unit(&store, path.unit_id, &user).await?;

    let deleted = delete_row(db_pool(&state)?, "units", &path.unit_id.to_string(), "id")
        .await
        .map_err(|error| match error {
            AppError::Conflict(_) => AppError::Conflict(
                "Unit has billing history and cannot be deleted.".to_string(),
            ),
            other => other,
        })?;
    tracing::info!(unit_id = %path.unit_id, owner_id = %user.id, "Deleted unit");
    Ok(Json(deleted))
}

/// Assigns, re-assigns or (with `tenant_id: null`) clears the unit's tenant,
/// then makes sure the tenancy's current month is billed.
async fn assign_tenant(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
    Json(payload): Json<AssignTenantInput>,
) -> AppResult<Json<Value>> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    let store = state.ledger()?;
    let pool = db_pool(&state)?;
    let unit = load_owned_unit(&store, path.unit_id, &owner).await?;

    if let Some(tenant_id) = payload.tenant_id {
        let tenant = find_row(pool, "users", &tenant_id.to_string(), "id")
            .await?
            .ok_or_else(|| AppError::NotFound("Tenant not found.".to_string()))?;
        if value_str(&tenant, "role") != Role::Tenant.as_str() {
            return Err(AppError::BadRequest(
                "Only users with the tenant role can be assigned to a unit.".to_string(),
            ));
        }
        if let Some(occupied) = store.find_unit_by_tenant(tenant_id).await? {
            if occupied.id != unit.id {
                return Err(AppError::Conflict(format!(
                    "Tenant already occupies unit {}.",
                    occupied.number
                )));
            }
        }
    }

    let now = Utc::now();
    let current = Tenancy {
        tenant_id: unit.tenant_id,
        tenant_added_at: unit.tenant_added_at,
    };
    let next = next_tenancy(current, payload.tenant_id, now);
    let updated = update_row(
        pool,
        "units",
        &unit.id.to_string(),
        &tenancy_patch(next),
        "id",
    )
    .await?;
    tracing::info!(
        unit_id = %unit.id,
        tenant_id = ?next.tenant_id,
        anchor_reset = next.tenant_added_at != unit.tenant_added_at,
        "Updated unit tenancy"
    );

    if next.tenant_id.is_some() {
        let assigned = store
            .find_unit(unit.id)
            .await?
            .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
        ensure_monthly_invoice(&store, &assigned, BillingMonth::of_timestamp(now)).await?;
    }
    Ok(Json(updated))
}

async fn get_my_unit(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let tenant = require_role(&state, &headers, Role::Tenant)?;
    let store = state.ledger()?;
    let Some(unit) = store.find_unit_by_tenant(tenant.id).await? else {
        return Ok(Json(json!({ "unit": null, "property": null })));
    };

    let pool = db_pool(&state)?;
    let unit_row = get_row(pool, "units", &unit.id.to_string(), "id").await?;
    let property = get_row(pool, "properties", &unit.property_id.to_string(), "id").await?;
    Ok(Json(json!({ "unit": unit_row, "property": property })))
}

async fn get_unit_by_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if !user.is_admin() && user.id != path.tenant_id {
        user.require_role(Role::Owner)?;
    }
    let store = state.ledger()?;
    let unit = store
        .find_unit_by_tenant(path.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant has no unit.".to_string()))?;
    if !user.is_admin() && user.id != path.tenant_id {
        assert_unit_owner(&unit, &user)?;
    }

    let record = get_row(db_pool(&state)?, "units", &unit.id.to_string(), "id").await?;
    Ok(Json(record))
}

async fn list_owner_tenants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    let store = state.ledger()?;
    let occupied = store
        .list_owner_units(owner.id)
        .await?
        .into_iter()
        .filter(UnitSnapshot::is_occupied)
        .collect::<Vec<_>>();

    let tenant_ids = occupied
        .iter()
        .filter_map(|unit| unit.tenant_id)
        .map(|id| Value::String(id.to_string()))
        .collect::<Vec<_>>();
    let mut filters = Map::new();
    filters.insert("id__in".to_string(), Value::Array(tenant_ids));
    let tenants = list_rows(
        db_pool(&state)?,
        "users",
        Some(&filters),
        1000,
        0,
        "name",
        true,
    )
    .await?
    .into_iter()
    .map(|tenant| (value_str(&tenant, "id"), public_user(tenant)))
    .collect::<HashMap<_, _>>();

    Ok(Json(json!({ "data": owner_tenant_rows(&occupied, &tenants) })))
}

async fn list_tenant_directory(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if !user.is_admin() {
        user.require_role(Role::Owner)?;
    }
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "role".to_string(),
        Value::String(Role::Tenant.as_str().to_string()),
    );
    let rows = list_rows(
        pool,
        "users",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "name",
        true,
    )
    .await?
    .into_iter()
    .map(|tenant| {
        json!({
            "id": tenant.get("id").cloned().unwrap_or(Value::Null),
            "name": tenant.get("name").cloned().unwrap_or(Value::Null),
            "email": tenant.get("email").cloned().unwrap_or(Value::Null),
            "phone": tenant.get("phone").cloned().unwrap_or(Value::Null),
        })
    })
    .collect::<Vec<_>>();
    Ok(Json(json!({ "data": rows })))
}

async fn load_owned_unit(
    store: &PgLedgerStore,
    unit_id: uuid::Uuid,
    user: &AuthUser,
) -> AppResult<UnitSnapshot> {
    let unit = store
        .find_unit(unit_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
    assert_unit_owner(&unit, user)?;
    Ok(unit)
}

fn tenancy_patch(tenancy: Tenancy) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(
        "tenant_id".to_string(),
        tenancy
            .tenant_id
            .map(|id| Value::String(id.to_string()))
            .unwrap_or(Value::Null),
    );
    patch.insert(
        "tenant_added_at".to_string(),
        tenancy
            .tenant_added_at
            .map(|at| Value::String(at.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    patch
}

fn owner_tenant_rows(units: &[UnitSnapshot], tenants: &HashMap<String, Value>) -> Vec<Value> {
    units
        .iter()
        .filter_map(|unit| {
            let tenant_id = unit.tenant_id?;
            Some(json!({
                "unit_id": unit.id,
                "unit_number": unit.number,
                "property_id": unit.property_id,
                "tenant_added_at": unit.tenant_added_at,
                "tenant": tenants
                    .get(&tenant_id.to_string())
                    .cloned()
                    .unwrap_or(Value::Null),
            }))
        })
        .collect()
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}
