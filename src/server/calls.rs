//! Call inspection and flow installation endpoints.
//!
//! Unlike the provider callbacks, these are consumed by the system's own
//! components, so they return explicit status codes instead of
//! unconditional 200s.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::warn;

use crate::input::StageDefinition;
use crate::types::CallId;

use super::AppState;

/// Returns the call session as JSON, or 404 for an unknown call.
pub async fn call_handler(
    State(app_state): State<AppState>,
    Path(call_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let call_id = CallId::new(call_id);
    match app_state.store().get_call(&call_id).await {
        Ok(Some(session)) => (
            StatusCode::OK,
            Json(serde_json::to_value(&session).unwrap_or_default()),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "call not found"})),
        ),
        Err(error) => {
            warn!(call_id = %call_id, error = %error, "call lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
        }
    }
}

/// Installs the input-collection flow for a call.
///
/// Body: JSON array of stage definitions. Returns the first stage for
/// prompting, or 422 for configuration errors (duplicate stage keys, bad
/// patterns, empty flow).
pub async fn install_flow_handler(
    State(app_state): State<AppState>,
    Path(call_id): Path<String>,
    Json(stages): Json<Vec<StageDefinition>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let call_id = CallId::new(call_id);
    match app_state.engine().start_flow(&call_id, stages) {
        Ok(first) => (
            StatusCode::OK,
            Json(serde_json::json!({"first_stage": first})),
        ),
        Err(error) => {
            warn!(call_id = %call_id, error = %error, "flow installation rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"error": error.to_string()})),
            )
        }
    }
}
