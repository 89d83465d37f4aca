use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{require_user, AuthUser, Role},
    error::{AppError, AppResult},
    repository::ledger_store::LedgerStore,
    schemas::UnitPath,
    state::AppState,
    tenancy::assert_unit_reader,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/payment-history", axum::routing::get(list_payment_history))
        .route(
            "/payment-history/unit/{unit_id}",
            axum::routing::get(list_unit_payment_history),
        )
}

async fn list_payment_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;

    let scope = history_scope(&store, &user).await?;
    let rows = store.list_payment_history(scope.as_deref()).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn list_unit_payment_history(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;
    let unit = store
        .find_unit(path.unit_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Unit not found.".to_string()))?;
    assert_unit_reader(&unit, &user)?;

    let rows = store
        .list_payment_history(Some([unit.id].as_slice()))
        .await?;
    Ok(Json(json!({ "data": rows })))
}

/// `None` reads every entry; otherwise only entries of the listed units.
async fn history_scope<S>(store: &S, user: &AuthUser) -> AppResult<Option<Vec<Uuid>>>
where
    S: LedgerStore + ?Sized,
{
    match user.role {
        Role::Admin => Ok(None),
        Role::Owner => {
            let units = store.list_owner_units(user.id).await?;
            Ok(Some(units.into_iter().map(|unit| unit.id).collect()))
        }
        Role::Tenant => {
            let unit = store.find_unit_by_tenant(user.id).await?;
            Ok(Some(unit.into_iter().map(|unit| unit.id).collect()))
        }
    }
}
