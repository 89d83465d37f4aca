use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    auth::{require_role, require_user, Role},
    error::{AppError, AppResult},
    repository::ledger_store::LedgerStore,
    schemas::{CreateInvoiceInput, InvoicePath, UnitPath, UpdateInvoiceInput},
    services::{
        invoice_ledger::{create_owner_invoices, record_payment, InvoiceTarget, PaymentUpdate},
        reconciliation::{
            ensure_current_and_list_owner_invoices, get_or_backfill_unit_invoices,
            list_tenant_invoices,
        },
    },
    state::AppState,
    tenancy::assert_unit_reader,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/invoices", axum::routing::post(create_invoice))
        .route("/invoices/owner", axum::routing::get(list_owner_invoices))
        .route("/invoices/mine", axum::routing::get(list_my_invoices))
        .route(
            "/invoices/unit/{unit_id}",
            axum::routing::get(list_unit_invoices),
        )
        .route(
            "/invoices/{invoice_id}",
            axum::routing::put(update_invoice),
        )
}

/// Lists a unit's invoices, generating any missing monthly invoice from the
/// tenancy anchor up to the current month.
async fn list_unit_invoices(
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

    let invoices = get_or_backfill_unit_invoices(&store, &unit, Utc::now().date_naive()).await?;
    Ok(Json(json!(invoices)))
}

async fn list_owner_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    let store = state.ledger()?;
    let invoices = ensure_current_and_list_owner_invoices(&store, owner.id, Utc::now()).await?;
    Ok(Json(json!(invoices)))
}

async fn list_my_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let tenant = require_role(&state, &headers, Role::Tenant)?;
    let store = state.ledger()?;
    let invoices = list_tenant_invoices(&store, tenant.id, Utc::now().date_naive()).await?;
    Ok(Json(json!(invoices)))
}

/// A unit target answers with the single invoice; property and all-units
/// targets answer with the invoices that were written.
async fn create_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateInvoiceInput>,
) -> AppResult<impl IntoResponse> {
    let owner = require_role(&state, &headers, Role::Owner)?;
    let request = payload.into_request()?;
    let store = state.ledger()?;

    let mut created = create_owner_invoices(&store, owner.id, &request).await?;
    let body = match request.target {
        InvoiceTarget::Unit(_) => {
            let invoice = created
                .pop()
                .ok_or_else(|| AppError::Internal("Invoice was not created.".to_string()))?;
            json!(invoice)
        }
        InvoiceTarget::Property(_) | InvoiceTarget::AllUnits => json!(created),
    };
    Ok((StatusCode::CREATED, Json(body)))
}

async fn update_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateInvoiceInput>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let store = state.ledger()?;
    let update = PaymentUpdate::from(payload);

    let outcome = record_payment(&store, &user, path.invoice_id, &update).await?;
    Ok(Json(json!({
        "invoice": outcome.invoice,
        "paymentHistory": outcome.history,
    })))
}
