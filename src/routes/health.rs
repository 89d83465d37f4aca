use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db = match &state.db_pool {
        // Bounded so health answers even while the first connection hangs.
        Some(pool) => match tokio::time::timeout(
            Duration::from_secs(3),
            sqlx::query("SELECT 1").fetch_one(pool),
        )
        .await
        {
            Ok(Ok(_)) => "ok",
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Health check DB query failed");
                "error"
            }
            Err(_) => {
                tracing::error!("Health check DB query timed out (3s)");
                "timeout"
            }
        },
        None => "not_configured",
    };

    let status = if db == "error" || db == "timeout" {
        "degraded"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "app": state.config.app_name,
        "environment": state.config.environment,
        "now": Utc::now().to_rfc3339(),
        "db": db
    }))
}
