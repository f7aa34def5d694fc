//! API route definitions.

use super::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::error;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/scan", post(run_scan))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "contamination": state.scanner.params().contamination,
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Run one scan. Detection failures surface as 422 with no partial results.
async fn run_scan(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.scanner.run().await {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(data) => (StatusCode::OK, Json(json!({ "data": data }))),
            Err(e) => {
                error!(error = %e, "failed to serialize scan report");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
            }
        },
        Err(e) => {
            error!(error = %e, "scan failed");
            let kind = e.kind();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string(), "kind": kind, "fatal": kind.is_fatal() })),
            )
        }
    }
}
