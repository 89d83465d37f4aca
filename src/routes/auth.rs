use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    auth::{issue_token, require_user, Role},
    db::{db_pool, map_db_error},
    error::{AppError, AppResult},
    repository::table_service::{create_row, find_row, get_row, list_rows, update_row},
    schemas::{
        remove_nulls, serialize_to_map, validate_input, ChangePasswordInput, LoginInput,
        RegisterInput, UpdateProfileInput, UserPath,
    },
    services::passwords::{hash_password, verify_password},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/auth/register", axum::routing::post(register))
        .route("/auth/login", axum::routing::post(login))
        .route(
            "/auth/me",
            axum::routing::get(get_me).patch(update_me),
        )
        .route(
            "/auth/change-password",
            axum::routing::post(change_password),
        )
        .route("/auth/profile/{user_id}", axum::routing::get(get_profile))
}

/// Self-registration always creates a tenant; owners are created by the admin.
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "email".to_string(),
        Value::String(normalize_email(&payload.email)),
    );
    record.insert(
        "password_hash".to_string(),
        Value::String(hash_password(&payload.password)?),
    );
    record.insert(
        "role".to_string(),
        Value::String(Role::Tenant.as_str().to_string()),
    );

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let user = create_row(&mut *tx, "users", &record)
        .await
        .map_err(duplicate_email)?;
    let user_id = row_uuid(&user, "id")?;
    let mut profile = Map::new();
    profile.insert("user_id".to_string(), Value::String(user_id.to_string()));
    create_row(&mut *tx, "tenant_profiles", &profile).await?;
    tx.commit().await.map_err(map_db_error)?;

    let token = issue_token(&state, user_id, Role::Tenant)?;
    tracing::info!(user_id = %user_id, "Registered tenant account");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "user": public_user(user) })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let user = find_user_by_email(pool, &payload.email)
        .await?
        .ok_or_else(invalid_credentials)?;
    let stored_hash = user
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !verify_password(&payload.password, stored_hash) {
        tracing::info!("Rejected login with wrong password");
        return Err(invalid_credentials());
    }

    let user_id = row_uuid(&user, "id")?;
    let role = value_str(&user, "role").parse::<Role>()?;
    let token = issue_token(&state, user_id, role)?;
    Ok(Json(json!({ "token": token, "user": public_user(user) })))
}

async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let pool = db_pool(&state)?;
    Ok(Json(load_profile(pool, user.id).await?))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if user.id != path.user_id && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Forbidden: you can only view your own profile.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;
    Ok(Json(load_profile(pool, path.user_id).await?))
}

async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfileInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "users", &user.id.to_string(), &patch, "id").await?;
    Ok(Json(public_user(updated)))
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "users", &user.id.to_string(), "id").await?;
    let stored_hash = record
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !verify_password(&payload.old_password, stored_hash) {
        return Err(AppError::BadRequest(
            "Current password is incorrect.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert(
        "password_hash".to_string(),
        Value::String(hash_password(&payload.new_password)?),
    );
    update_row(pool, "users", &user.id.to_string(), &patch, "id").await?;
    tracing::info!(user_id = %user.id, "Password changed");
    Ok(Json(json!({ "message": "Password updated." })))
}

/// User row with its role profile attached under `profile`.
pub(crate) async fn load_profile(pool: &PgPool, user_id: Uuid) -> AppResult<Value> {
    let id = user_id.to_string();
    let user = get_row(pool, "users", &id, "id").await?;
    let profile = match value_str(&user, "role").as_str() {
        "owner" => find_row(pool, "owner_profiles", &id, "user_id").await?,
        "tenant" => find_row(pool, "tenant_profiles", &id, "user_id").await?,
        _ => None,
    };

    let mut user = public_user(user);
    if let Some(object) = user.as_object_mut() {
        object.insert("profile".to_string(), profile.unwrap_or(Value::Null));
    }
    Ok(user)
}

pub(crate) fn public_user(mut user: Value) -> Value {
    if let Some(object) = user.as_object_mut() {
        object.remove("password_hash");
    }
    user
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub(crate) fn duplicate_email(error: AppError) -> AppError {
    match error {
        AppError::Conflict(_) => {
            AppError::Conflict("An account with this email already exists.".to_string())
        }
        other => other,
    }
}

pub(crate) fn row_uuid(row: &Value, key: &str) -> AppResult<Uuid> {
    Uuid::parse_str(&value_str(row, key))
        .map_err(|_| AppError::Internal(format!("Row is missing a valid {key}.")))
}

async fn find_user_by_email(pool: &PgPool, email: &str) -> AppResult<Option<Value>> {
    let mut filters = Map::new();
    filters.insert(
        "email".to_string(),
        Value::String(normalize_email(email)),
    );
    let rows = list_rows(pool, "users", Some(&filters), 1, 0, "created_at", true).await?;
    Ok(rows.into_iter().next())
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid email or password.".to_string())
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{duplicate_email, normalize_email, public_user, row_uuid};
    use crate::error::AppError;

    #[test]
    fn public_user_never_exposes_the_hash() {
        let user = public_user(json!({
            "id": "7b0f1d0e-5d57-4a4e-9d0c-0a4b5b8e2c11",
            "email": "asha@example.com",
            "password_hash": "$argon2id$v=19$..."
        }));
        assert!(user.get("password_hash").is_none());
        assert_eq!(user["email"], "asha@example.com");
    }

    #[test]
    fn emails_are_case_insensitive() {
        assert_eq!(normalize_email("  Asha@Example.COM "), "asha@example.com");
    }

    #[test]
    fn unique_violations_read_as_duplicate_email() {
        let mapped = duplicate_email(AppError::Conflict("unique".to_string()));
        assert_eq!(
            mapped.to_string(),
            "An account with this email already exists."
        );
        assert!(matches!(
            duplicate_email(AppError::Dependency("db".to_string())),
            AppError::Dependency(_)
        ));
    }

    #[test]
    fn row_ids_must_be_uuids() {
        assert!(row_uuid(&json!({ "id": "nope" }), "id").is_err());
        assert!(row_uuid(&json!({ "id": "7b0f1d0e-5d57-4a4e-9d0c-0a4b5b8e2c11" }), "id").is_ok());
    }
}
