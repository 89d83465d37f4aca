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
    db::{db_pool, map_db_error},
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, list_rows, upsert_row},
    routes::auth::{duplicate_email, load_profile, normalize_email, public_user, row_uuid},
    schemas::{
        clamp_limit, remove_nulls, serialize_to_map, validate_input, CreateOwnerInput,
        ListQuery, OwnerPath, UpdateOwnerProfileInput,
    },
    services::passwords::hash_password,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/owners",
            axum::routing::get(list_owners).post(create_owner),
        )
        .route(
            "/owners/{owner_id}",
            axum::routing::get(get_owner).delete(delete_owner),
        )
        .route(
            "/owners/{owner_id}/profile",
            axum::routing::patch(update_owner_profile),
        )
}

async fn create_owner(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOwnerInput>,
) -> AppResult<impl IntoResponse> {
    let admin = require_role(&state, &headers, Role::Admin)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut user = Map::new();
    user.insert("name".to_string(), Value::String(payload.name.trim().to_string()));
    user.insert(
        "email".to_string(),
        Value::String(normalize_email(&payload.email)),
    );
    user.insert(
        "password_hash".to_string(),
        Value::String(hash_password(&payload.password)?),
    );
    user.insert(
        "role".to_string(),
        Value::String(Role::Owner.as_str().to_string()),
    );
    if let Some(phone) = &payload.phone {
        user.insert("phone".to_string(), Value::String(phone.clone()));
    }
    if let Some(address) = &payload.address {
        user.insert("address".to_string(), Value::String(address.clone()));
    }

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let created = create_row(&mut *tx, "users", &user)
        .await
        .map_err(duplicate_email)?;
    let owner_id = row_uuid(&created, "id")?;

    let mut profile = Map::new();
    profile.insert("user_id".to_string(), Value::String(owner_id.to_string()));
    if let Some(license_number) = &payload.license_number {
        profile.insert(
            "license_number".to_string(),
            Value::String(license_number.clone()),
        );
    }
    if let Some(documents) = &payload.documents {
        profile.insert("documents".to_string(), Value::String(documents.clone()));
    }
    let profile = create_row(&mut *tx, "owner_profiles", &profile).await?;
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(owner_id = %owner_id, admin_id = %admin.id, "Created owner account");
    let mut owner = public_user(created);
    if let Some(object) = owner.as_object_mut() {
        object.insert("profile".to_string(), profile);
    }
    Ok((StatusCode::CREATED, Json(owner)))
}

async fn list_owners(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_role(&state, &headers, Role::Admin)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "role".to_string(),
        Value::String(Role::Owner.as_str().to_string()),
    );
    let owners = list_rows(
        pool,
        "users",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;

    let owner_ids = owners
        .iter()
        .filter_map(|owner| owner.get("id").cloned())
        .collect::<Vec<_>>();
    let mut profile_filters = Map::new();
    profile_filters.insert("user_id__in".to_string(), Value::Array(owner_ids));
    let profiles = list_rows(
        pool,
        "owner_profiles",
        Some(&profile_filters),
        1000,
        0,
        "user_id",
        true,
    )
    .await?;
    let mut profiles_by_owner = profiles
        .into_iter()
        .filter_map(|profile| {
            let user_id = profile.get("user_id")?.as_str()?.to_string();
            Some((user_id, profile))
        })
        .collect::<HashMap<_, _>>();

    let rows = owners
        .into_iter()
        .map(|owner| {
            let id = owner
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut owner = public_user(owner);
            if let Some(object) = owner.as_object_mut() {
                object.insert(
                    "profile".to_string(),
                    profiles_by_owner.remove(&id).unwrap_or(Value::Null),
                );
            }
            owner
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({ "data": rows })))
}

async fn get_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    assert_owner_or_admin(&user, path.owner_id)?;
    let pool = db_pool(&state)?;

    let owner = load_profile(pool, path.owner_id).await?;
    ensure_owner_role(&owner)?;
    Ok(Json(owner))
}

async fn update_owner_profile(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateOwnerProfileInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    assert_owner_or_admin(&user, path.owner_id)?;
    if payload.verified.is_some() && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Forbidden: only the admin can verify owners.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let owner = load_profile(pool, path.owner_id).await?;
    ensure_owner_role(&owner)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "user_id".to_string(),
        Value::String(path.owner_id.to_string()),
    );
    let profile = upsert_row(pool, "owner_profiles", &record, "user_id").await?;
    Ok(Json(profile))
}

async fn delete_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let admin = require_role(&state, &headers, Role::Admin)?;
    let pool = db_pool(&state)?;

    let owner = load_profile(pool, path.owner_id).await?;
    ensure_owner_role(&owner)?;
    let deleted = delete_row(pool, "users", &path.owner_id.to_string(), "id")
        .await
        .map_err(|error| match error {
            AppError::Conflict(_) => AppError::Conflict(
                "Owner still has properties; delete or transfer them first.".to_string(),
            ),
            other => other,
        })?;
    tracing::info!(owner_id = %path.owner_id, admin_id = %admin.id, "Deleted owner account");
    Ok(Json(public_user(deleted)))
}

fn assert_owner_or_admin(user: &crate::auth::AuthUser, owner_id: uuid::Uuid) -> AppResult<()> {
    if user.is_admin() || user.id == owner_id {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: you can only manage your own owner profile.".to_string(),
    ))
}

fn ensure_owner_role(user: &Value) -> AppResult<()> {
    if user.get("role").and_then(Value::as_str) == Some(Role::Owner.as_str()) {
        return Ok(());
    }
    Err(AppError::NotFound("Owner not found.".to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{assert_owner_or_admin, ensure_owner_role};
    use crate::auth::{AuthUser, Role};

    #[test]
    fn owners_manage_only_themselves() {
        let owner_id = Uuid::new_v4();
        let owner = AuthUser {
            id: owner_id,
            role: Role::Owner,
        };
        let admin = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        assert!(assert_owner_or_admin(&owner, owner_id).is_ok());
        assert!(assert_owner_or_admin(&owner, Uuid::new_v4()).is_err());
        assert!(assert_owner_or_admin(&admin, owner_id).is_ok());
    }

    #[test]
    fn tenants_are_not_owners() {
        assert!(ensure_owner_role(&json!({ "role": "owner" })).is_ok());
        assert!(ensure_owner_role(&json!({ "role": "tenant" })).is_err());
    }
}
