use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::{
    auth::{require_role, require_user, Role},
    db::db_pool,
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit, remove_nulls, serialize_to_map, validate_input, CreatePropertyInput,
        ListQuery, PropertyPath, UpdatePropertyInput,
    },
    state::AppState,
    tenancy::load_owned_property,
};

/// Columns visible on the unauthenticated catalogue.
const PUBLIC_PROPERTY_FIELDS: &[&str] = &["id", "name", "address", "images", "created_at"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_public_properties).post(create_property),
        )
        .route("/properties/mine", axum::routing::get(list_my_properties))
        .route("/properties/all", axum::routing::get(list_all_properties))
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property)
                .patch(update_property)
                .delete(delete_property),
        )
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("owner_id".to_string(), Value::String(owner.id.to_string()));
    let created = create_row(pool, "properties", &record).await?;
    tracing::info!(
        owner_id = %owner.id,
        property_id = %value_str(&created, "id"),
        "Created property"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_public_properties(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;
    let rows = list_rows(
        pool,
        "properties",
        None,
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    let rows = rows.into_iter().map(public_property).collect::<Vec<_>>();
    Ok(Json(json!({ "data": rows })))
}

async fn list_my_properties(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner.id.to_string()));
    let properties = list_rows(
        pool,
        "properties",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;

    let property_ids = properties
        .iter()
        .filter_map(|property| property.get("id").cloned())
        .collect::<Vec<_>>();
    let mut unit_filters = Map::new();
    unit_filters.insert("property_id__in".to_string(), Value::Array(property_ids));
    let units = list_rows(pool, "units", Some(&unit_filters), 1000, 0, "number", true).await?;

    Ok(Json(json!({ "data": attach_units(properties, units) })))
}

async fn list_all_properties(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_role(&state, &headers, Role::Admin)?;
    let pool = db_pool(&state)?;

    let properties = list_rows(
        pool,
        "properties",
        None,
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;

    let owner_ids = properties
        .iter()
        .filter_map(|property| property.get("owner_id").cloned())
        .collect::<Vec<_>>();
    let mut owner_filters = Map::new();
    owner_filters.insert("id__in".to_string(), Value::Array(owner_ids));
    let owners = list_rows(pool, "users", Some(&owner_filters), 1000, 0, "name", true)
        .await?
        .into_iter()
        .map(|owner| {
            let id = value_str(&owner, "id");
            let summary = json!({
                "id": owner.get("id").cloned().unwrap_or(Value::Null),
                "name": owner.get("name").cloned().unwrap_or(Value::Null),
                "email": owner.get("email").cloned().unwrap_or(Value::Null),
                "phone": owner.get("phone").cloned().unwrap_or(Value::Null),
            });
            (id, summary)
        })
        .collect::<HashMap<_, _>>();

    let rows = properties
        .into_iter()
        .map(|mut property| {
            let owner = owners
                .get(&value_str(&property, "owner_id"))
                .cloned()
                .unwrap_or(Value::Null);
            if let Some(object) = property.as_object_mut() {
                object.insert("owner".to_string(), owner);
            }
            property
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({ "data": rows })))
}

/// Any signed-in user; tenants read their property's payment instructions here.
async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers)?;
    let pool = db_pool(&state)?;
    let record = get_row(pool, "properties", &path.property_id.to_string(), "id").await?;
    Ok(Json(record))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    load_owned_property(pool, path.property_id, &user).await?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(
        pool,
        "properties",
        &path.property_id.to_string(),
        &patch,
        "id",
    )
    .await?;
    Ok(Json(updated))
}

async fn delete_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let pool = db_pool(&state)?;
    load_owned_property(pool, path.property_id, &user).await?;

    let deleted = delete_row(pool, "properties", &path.property_id.to_string(), "id")
        .await
        .map_err(|error| match error {
            AppError::Conflict(_) => AppError::Conflict(
                "Property has units with billing history and cannot be deleted.".to_string(),
            ),
            other => other,
        })?;
    tracing::info!(property_id = %path.property_id, owner_id = %user.id, "Deleted property");
    Ok(Json(deleted))
}

fn public_property(property: Value) -> Value {
    let Value::Object(mut object) = property else {
        return property;
    };
    object.retain(|key, _| PUBLIC_PROPERTY_FIELDS.contains(&key.as_str()));
    Value::Object(object)
}

fn attach_units(properties: Vec<Value>, units: Vec<Value>) -> Vec<Value> {
    let mut units_by_property: HashMap<String, Vec<Value>> = HashMap::new();
    for unit in units {
        units_by_property
            .entry(value_str(&unit, "property_id"))
            .or_default()
            .push(unit);
    }

    properties
        .into_iter()
        .map(|mut property| {
            let units = units_by_property
                .remove(&value_str(&property, "id"))
                .unwrap_or_default();
            if let Some(object) = property.as_object_mut() {
                object.insert("units".to_string(), Value::Array(units));
            }
            property
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
