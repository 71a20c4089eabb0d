//! Health check endpoint.
//!
//! Returns 200 OK with the dispatch-queue statistics. Intended both for
//! liveness probes and as the observability read for delivery counters.

use axum::Json;
use axum::extract::State;

use super::AppState;

/// Health check handler.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok","dispatch":{"processed":12,"successful":11,"failed":1,"retried":1}}
/// ```
pub async fn health_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let stats = app_state.queue().stats();
    Json(serde_json::json!({
        "status": "ok",
        "dispatch": stats,
    }))
}
