//! Call-answering hint detection.
//!
//! Converts low-level provider signals into user-facing hints, each emitted
//! at most once per call:
//!
//! - `machine_detected` (high priority): answering-machine detection
//!   classified the callee as a machine.
//! - `caller_listening` (normal priority): a human is on the line.
//! - `input_detected` (high priority): the callee pressed a key. A keypad
//!   event also implies a human, so `caller_listening` is emitted first if
//!   it hasn't been already.
//!
//! Hint state is in-memory per call, created lazily on the first event and
//! discarded when the call reaches a terminal status. Emission requires the
//! call's notification destination; calls without one skip emission with a
//! warning (logged, not retried).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatch::DispatchQueue;
use crate::store::CallStore;
use crate::types::{
    AnsweredBy, CallId, CanonicalStatus, NotificationPriority, NotificationRecord,
    NotificationType,
};

/// The three hint types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    MachineDetected,
    CallerListening,
    InputDetected,
}

impl HintKind {
    fn notification_type(self) -> NotificationType {
        match self {
            HintKind::MachineDetected => NotificationType::MachineDetected,
            HintKind::CallerListening => NotificationType::CallerListening,
            HintKind::InputDetected => NotificationType::InputDetected,
        }
    }

    fn priority(self) -> NotificationPriority {
        match self {
            HintKind::MachineDetected => NotificationPriority::High,
            HintKind::CallerListening => NotificationPriority::Normal,
            HintKind::InputDetected => NotificationPriority::High,
        }
    }
}

/// Per-call detector state.
#[derive(Debug, Default)]
struct HintState {
    last_status: Option<CanonicalStatus>,
    last_answered_by: AnsweredBy,
    keypad_events: u32,
    emitted: HashSet<HintKind>,
}

/// Watches the status and keypad event streams and emits each hint at most
/// once per call.
pub struct HintDetector {
    store: Arc<dyn CallStore>,
    queue: Arc<DispatchQueue>,
    states: Mutex<HashMap<CallId, HintState>>,
}

impl HintDetector {
    pub fn new(store: Arc<dyn CallStore>, queue: Arc<DispatchQueue>) -> Self {
        HintDetector {
            store,
            queue,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Feeds a canonical status update into the detector.
    ///
    /// Terminal statuses discard the call's hint state. Side-effecting only;
    /// emission failures never propagate to the caller.
    pub async fn on_status(
        &self,
        call_id: &CallId,
        status: &CanonicalStatus,
        answered_by: AnsweredBy,
    ) {
        if status.is_terminal() {
            self.discard(call_id);
            return;
        }

        let to_emit = {
            let mut states = self.states.lock().expect("hint mutex poisoned");
            let state = states.entry(call_id.clone()).or_default();
            state.last_status = Some(status.clone());
            if answered_by != AnsweredBy::Unknown {
                state.last_answered_by = answered_by;
            }

            let answered_context = matches!(
                status,
                CanonicalStatus::Answered | CanonicalStatus::InProgress
            ) || answered_by != AnsweredBy::Unknown;

            let mut to_emit = Vec::new();
            if answered_context {
                match state.last_answered_by {
                    AnsweredBy::Machine => {
                        if state.emitted.insert(HintKind::MachineDetected) {
                            to_emit.push(HintKind::MachineDetected);
                        }
                    }
                    AnsweredBy::Human => {
                        if state.emitted.insert(HintKind::CallerListening) {
                            to_emit.push(HintKind::CallerListening);
                        }
                    }
                    AnsweredBy::Unknown => {}
                }
            }
            to_emit
        };

        for kind in to_emit {
            self.emit(call_id, kind).await;
        }
    }

    /// Feeds one keypad event into the detector.
    ///
    /// Digits imply a human pressed a key, so `caller_listening` precedes
    /// `input_detected` on the first event; every later event is a no-op for
    /// hint purposes.
    pub async fn on_keypad_event(&self, call_id: &CallId) {
        let to_emit = {
            let mut states = self.states.lock().expect("hint mutex poisoned");
            let state = states.entry(call_id.clone()).or_default();
            state.keypad_events += 1;

            let mut to_emit = Vec::new();
            if state.emitted.insert(HintKind::CallerListening) {
                to_emit.push(HintKind::CallerListening);
            }
            if state.emitted.insert(HintKind::InputDetected) {
                to_emit.push(HintKind::InputDetected);
            }
            to_emit
        };

        for kind in to_emit {
            self.emit(call_id, kind).await;
        }
    }

    /// Discards the call's hint state (terminal cleanup).
    pub fn discard(&self, call_id: &CallId) {
        let mut states = self.states.lock().expect("hint mutex poisoned");
        if let Some(state) = states.remove(call_id) {
            debug!(
                call_id = %call_id,
                last_status = ?state.last_status,
                keypad_events = state.keypad_events,
                "hint state discarded"
            );
        }
    }

    /// Number of calls with live hint state.
    pub fn active_calls(&self) -> usize {
        self.states.lock().expect("hint mutex poisoned").len()
    }

    /// Enqueues the hint notification. The emitted-set was already updated,
    /// so a skipped emission (unknown call, no destination, storage error)
    /// is not retried.
    async fn emit(&self, call_id: &CallId, kind: HintKind) {
        let session = match self.store.get_call(call_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(call_id = %call_id, hint = ?kind, "hint skipped: call not found");
                return;
            }
            Err(error) => {
                warn!(call_id = %call_id, hint = ?kind, error = %error, "hint skipped: store error");
                return;
            }
        };

        let Some(destination) = session.destination else {
            warn!(call_id = %call_id, hint = ?kind, "hint skipped: no destination");
            return;
        };

        let record = NotificationRecord::new(
            call_id.clone(),
            kind.notification_type(),
            serde_json::json!({
                "call_id": call_id,
                "hint": kind,
                "answered_by": session.answered_by,
            }),
            destination,
            kind.priority(),
            Utc::now(),
        );

        if let Err(error) = self.queue.enqueue(record).await {
            warn!(call_id = %call_id, hint = ?kind, error = %error, "hint enqueue failed");
        } else {
            debug!(call_id = %call_id, hint = ?kind, "hint emitted");
        }
    }
}
