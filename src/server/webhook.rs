//! Provider callback endpoints.
//!
//! Two push-style entry points from the call provider:
//!
//! - `POST /webhook/status`: status events, fed to the reconciler.
//! - `POST /webhook/digits`: keypad events, fed to the hint detector and
//!   the input engine.
//!
//! Both are total functions toward the provider: after signature
//! verification, every request is answered 200 with a structured JSON body,
//! including validation and storage failures (which are logged). Bouncing a
//! callback with a 5xx would only trigger provider-side retry storms.
//! Invalid signatures are the one exception (401): a bad signature is not
//! the provider.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::input::SubmitOutcome;
use crate::types::{
    CallId, NotificationPriority, NotificationRecord, NotificationType,
};
use crate::webhooks::verify_signature;

use super::AppState;

/// Header carrying the HMAC-SHA256 payload signature.
const HEADER_SIGNATURE: &str = "x-ringline-signature";

/// Status callback body. Providers attach arbitrary extra fields; the whole
/// body is retained as the raw payload for audit.
#[derive(Debug, Deserialize)]
struct StatusCallback {
    call_id: String,
    status: String,
}

/// Keypad callback body.
#[derive(Debug, Deserialize)]
struct DigitsCallback {
    call_id: String,
    digits: String,
}

/// Status webhook handler.
///
/// # Response
///
/// - 200 with the ingest outcome (or an `accepted: false` error body)
/// - 401 for an invalid signature when a secret is configured
pub async fn status_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(response) = check_signature(&app_state, &headers, &body) {
        return response;
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(error = %error, "status callback with invalid JSON acknowledged");
            return acknowledged_error("invalid json");
        }
    };

    let callback: StatusCallback = match serde_json::from_value(payload.clone()) {
        Ok(callback) => callback,
        Err(error) => {
            warn!(error = %error, "status callback missing required fields acknowledged");
            return acknowledged_error("missing call_id or status");
        }
    };

    let call_id = CallId::new(callback.call_id);
    debug!(call_id = %call_id, status = %callback.status, "status callback received");

    match app_state
        .reconciler()
        .ingest(&call_id, &callback.status, payload, Utc::now())
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::to_value(outcome).unwrap_or_else(|_| serde_json::json!({
                "accepted": true,
            }))),
        ),
        Err(error) => {
            // Storage failures are logged and the callback is still
            // acknowledged; the provider must not retry into a storm.
            warn!(call_id = %call_id, error = %error, "status ingest failed, acknowledged anyway");
            acknowledged_error("storage unavailable")
        }
    }
}

/// Keypad webhook handler.
///
/// Feeds the hint detector (a key press implies a listening human), then
/// submits the digits to the input engine and returns its structured result.
pub async fn digits_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(response) = check_signature(&app_state, &headers, &body) {
        return response;
    }

    let callback: DigitsCallback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(error) => {
            warn!(error = %error, "digits callback with invalid body acknowledged");
            return acknowledged_error("missing call_id or digits");
        }
    };

    let call_id = CallId::new(callback.call_id);
    debug!(call_id = %call_id, "keypad callback received");

    app_state.hints().on_keypad_event(&call_id).await;

    match app_state.engine().submit(&call_id, &callback.digits) {
        Ok(outcome) => {
            notify_flow_outcome(&app_state, &call_id, &outcome).await;
            (
                StatusCode::OK,
                Json(serde_json::to_value(outcome).unwrap_or_else(|_| serde_json::json!({
                    "result": "error",
                }))),
            )
        }
        Err(error) => {
            // Missing-flow and configuration errors are logged and skipped;
            // the callback is still acknowledged.
            warn!(call_id = %call_id, error = %error, "digit submission skipped");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "result": "error",
                    "error": error.to_string(),
                })),
            )
        }
    }
}

/// Enqueues a flow-completion or flow-failure notification when a
/// submission finished the flow one way or the other.
///
/// Same isolation rules as the reconciler's terminal notification: a
/// missing destination or enqueue failure is logged and skipped, never
/// surfaced to the provider.
async fn notify_flow_outcome(app_state: &AppState, call_id: &CallId, outcome: &SubmitOutcome) {
    let (notification_type, priority, payload) = match outcome {
        SubmitOutcome::FlowComplete => (
            NotificationType::InputFlowCompleted,
            NotificationPriority::Normal,
            serde_json::json!({"call_id": call_id}),
        ),
        SubmitOutcome::FlowFailed { stage } => (
            NotificationType::InputFlowFailed,
            NotificationPriority::High,
            serde_json::json!({"call_id": call_id, "stage": stage}),
        ),
        _ => return,
    };

    let destination = match app_state.store().get_call(call_id).await {
        Ok(Some(session)) => session.destination,
        Ok(None) => None,
        Err(error) => {
            warn!(call_id = %call_id, error = %error, "flow notification skipped: store error");
            return;
        }
    };
    let Some(destination) = destination else {
        warn!(call_id = %call_id, "flow notification skipped: no destination");
        return;
    };

    let record = NotificationRecord::new(
        call_id.clone(),
        notification_type,
        payload,
        destination,
        priority,
        Utc::now(),
    );
    if let Err(error) = app_state.queue().enqueue(record).await {
        warn!(call_id = %call_id, error = %error, "flow notification enqueue failed");
    }
}

/// Verifies the payload signature when a secret is configured.
///
/// Verification runs before any parsing or store access.
fn check_signature(
    app_state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> std::result::Result<(), (StatusCode, Json<serde_json::Value>)> {
    let Some(secret) = app_state.webhook_secret() else {
        return Ok(());
    };

    let header = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if verify_signature(body, header, secret) {
        Ok(())
    } else {
        warn!("webhook rejected: invalid signature");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid signature"})),
        ))
    }
}

fn acknowledged_error(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "accepted": false,
            "error": message,
        })),
    )
}
