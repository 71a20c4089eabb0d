//! Webhook reconciliation: idempotent ingestion of provider status events.
//!
//! One `ingest` call per provider callback. The reconciler:
//!
//! 1. computes the event signature and absorbs duplicates within the
//!    suppression window (no side effects),
//! 2. canonicalizes the provider status,
//! 3. appends the event to the audit log,
//! 4. advances the session's canonical status under the terminal-
//!    monotonicity guard,
//! 5. on the transition into a terminal status, computes the outcome,
//!    enqueues the completion/failure notification, and discards the call's
//!    in-memory input and hint state.
//!
//! # Failure semantics
//!
//! Only storage failures surface to the caller (retryable). Notification
//! and hint errors are logged and isolated; a delivery problem must never
//! bounce a provider callback.
//!
//! # Serialization
//!
//! Events for the same call are processed under a per-call async mutex held
//! across the dedup-check → persist cycle, so two terminal writes can never
//! race. Events for different calls proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::dispatch::DispatchQueue;
use crate::hints::HintDetector;
use crate::input::InputStepEngine;
use crate::store::{CallStore, Result};
use crate::types::{
    AnsweredBy, CallId, CallOutcome, CallPatch, CallSession, CanonicalStatus,
    NotificationPriority, NotificationRecord, NotificationType, OutcomeReason, WebhookEvent,
};

use super::canonical::canonicalize;
use super::dedupe::{DEFAULT_BUCKET, DEFAULT_TTL, DedupeWindow, EventSignature};

/// Result of one ingest call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// False when the event was absorbed as a duplicate (no side effects).
    pub accepted: bool,

    pub canonical_status: CanonicalStatus,

    pub is_terminal: bool,

    /// Set only when this event transitioned the session into a terminal
    /// status.
    pub outcome: Option<CallOutcome>,
}

/// Dedup window parameters.
#[derive(Debug, Clone, Copy)]
pub struct DedupeConfig {
    /// Time bucket folded into the event signature.
    pub bucket: Duration,

    /// Retention of seen signatures.
    pub ttl: Duration,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        DedupeConfig {
            bucket: DEFAULT_BUCKET,
            ttl: DEFAULT_TTL,
        }
    }
}

/// The webhook reconciler.
pub struct Reconciler {
    store: Arc<dyn CallStore>,
    engine: Arc<InputStepEngine>,
    hints: Arc<HintDetector>,
    queue: Arc<DispatchQueue>,
    dedupe: StdMutex<DedupeWindow>,
    bucket: Duration,
    locks: AsyncMutex<HashMap<CallId, Arc<AsyncMutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CallStore>,
        engine: Arc<InputStepEngine>,
        hints: Arc<HintDetector>,
        queue: Arc<DispatchQueue>,
        config: DedupeConfig,
    ) -> Self {
        Reconciler {
            store,
            engine,
            hints,
            queue,
            dedupe: StdMutex::new(DedupeWindow::new(config.ttl)),
            bucket: config.bucket,
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Ingests one provider status event.
    ///
    /// Safe to invoke concurrently for different calls; events for the same
    /// call serialize on a per-call mutex.
    pub async fn ingest(
        &self,
        call_id: &CallId,
        raw_status: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let canonical = canonicalize(raw_status);

        let lock = self.call_lock(call_id).await;
        let _guard = lock.lock().await;

        // Dedup check and mark happen inside the per-call critical section,
        // so an accepted-but-not-yet-persisted duplicate cannot slip past.
        let signature = EventSignature::compute(call_id, raw_status, now, self.bucket);
        {
            let mut window = self.dedupe.lock().expect("dedupe mutex poisoned");
            window.prune(now);
            if window.is_duplicate(&signature, now) {
                debug!(call_id = %call_id, status = raw_status, "duplicate event absorbed");
                return Ok(IngestOutcome {
                    accepted: false,
                    is_terminal: canonical.is_terminal(),
                    canonical_status: canonical,
                    outcome: None,
                });
            }
            window.mark_seen(signature, now);
        }

        let existing = self.store.get_call(call_id).await?;
        let already_terminal = existing
            .as_ref()
            .map(|s| s.status.is_terminal())
            .unwrap_or(false);

        self.store
            .append_event(WebhookEvent {
                call_id: call_id.clone(),
                status: canonical.clone(),
                payload: payload.clone(),
                received_at: now,
            })
            .await?;

        if already_terminal {
            // Terminal monotonicity: the event is kept for audit, but the
            // session never leaves its terminal status and the outcome is
            // never recomputed.
            debug!(
                call_id = %call_id,
                status = raw_status,
                "event after terminal status recorded for audit only"
            );
            return Ok(IngestOutcome {
                accepted: true,
                canonical_status: canonical,
                is_terminal: true,
                outcome: None,
            });
        }

        let answered_by = payload
            .get("answered_by")
            .and_then(|v| v.as_str())
            .map(AnsweredBy::from_provider);

        let mut patch = CallPatch {
            status: Some(canonical.clone()),
            provider_status: Some(raw_status.to_string()),
            answered_by,
            recording_available: payload
                .get("recording_url")
                .filter(|v| !v.is_null())
                .map(|_| true),
            transcript_available: payload
                .get("transcript_url")
                .filter(|v| !v.is_null())
                .map(|_| true),
            ..CallPatch::default()
        };

        let mut outcome = None;
        if canonical.is_terminal() {
            let started_at = existing.as_ref().map(|s| s.started_at).unwrap_or(now);
            let duration_secs = (now - started_at).num_seconds().max(0);

            let (success, reason) = self.compute_outcome(call_id, &canonical, &payload);
            let call_outcome = CallOutcome {
                success,
                reason,
                completed_at: now,
            };

            patch.ended_at = Some(now);
            patch.duration_secs = Some(duration_secs);
            patch.outcome = Some(call_outcome.clone());
            outcome = Some(call_outcome);
        }

        let updated = self.store.upsert_call(call_id, patch, now).await?;

        if canonical.is_terminal() {
            info!(
                call_id = %call_id,
                status = %canonical,
                success = outcome.as_ref().map(|o| o.success),
                duration_secs = updated.duration_secs,
                "call reached terminal status"
            );
            self.notify_terminal(&updated).await;
            self.engine.clear(call_id);
            self.hints.discard(call_id);
            // Evict the per-call lock entry; the guard we hold keeps the
            // mutex itself alive, and post-terminal events are audit-only,
            // so a racing re-creation of the entry is harmless.
            self.locks.lock().await.remove(call_id);
        } else {
            self.hints
                .on_status(call_id, &canonical, answered_by.unwrap_or_default())
                .await;
        }

        Ok(IngestOutcome {
            accepted: true,
            is_terminal: canonical.is_terminal(),
            canonical_status: canonical,
            outcome,
        })
    }

    /// Computes `(success, reason)` for a terminal status.
    ///
    /// Success requires a `completed` status with no unconfirmed input
    /// stages; stages that were never reached count as unconfirmed.
    fn compute_outcome(
        &self,
        call_id: &CallId,
        status: &CanonicalStatus,
        payload: &serde_json::Value,
    ) -> (bool, OutcomeReason) {
        match status {
            CanonicalStatus::Completed => {
                if self.engine.has_unconfirmed(call_id) {
                    (false, OutcomeReason::InputValidationFailed)
                } else {
                    (true, OutcomeReason::Completed)
                }
            }
            CanonicalStatus::Busy => (false, OutcomeReason::Busy),
            CanonicalStatus::NoAnswer => (false, OutcomeReason::NoAnswer),
            CanonicalStatus::Canceled => (false, OutcomeReason::UserCanceled),
            CanonicalStatus::Failed => {
                let reason = payload
                    .get("reason")
                    .or_else(|| payload.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("failed");
                (false, OutcomeReason::Provider(reason.to_string()))
            }
            other => (false, OutcomeReason::Provider(other.as_str().to_string())),
        }
    }

    /// Enqueues the terminal notification for the session. Failures are
    /// logged and isolated; they never bounce the webhook.
    async fn notify_terminal(&self, session: &CallSession) {
        let Some(outcome) = &session.outcome else {
            return;
        };
        let Some(destination) = session.destination.clone() else {
            warn!(call_id = %session.call_id, "terminal notification skipped: no destination");
            return;
        };

        let (notification_type, priority) = if outcome.success {
            (NotificationType::CallCompleted, NotificationPriority::Normal)
        } else {
            (NotificationType::CallFailed, NotificationPriority::High)
        };

        let record = NotificationRecord::new(
            session.call_id.clone(),
            notification_type,
            serde_json::json!({
                "call_id": session.call_id,
                "success": outcome.success,
                "reason": outcome.reason,
                "duration_secs": session.duration_secs,
            }),
            destination,
            priority,
            outcome.completed_at,
        );

        if let Err(error) = self.queue.enqueue(record).await {
            warn!(
                call_id = %session.call_id,
                error = %error,
                "terminal notification enqueue failed"
            );
        }
    }

    async fn call_lock(&self, call_id: &CallId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(call_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;
    use crate::dispatch::channel::testing::RecordingChannel;
    use crate::input::{LengthRule, StageDefinition};
    use crate::store::MemoryStore;
    use crate::types::{DestinationId, StageKey};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Arc<InputStepEngine>,
        hints: Arc<HintDetector>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(RecordingChannel::new());
        let queue = Arc::new(DispatchQueue::new(
            Arc::clone(&store) as Arc<dyn CallStore>,
            channel,
            DispatchConfig::default(),
        ));
        let engine = Arc::new(InputStepEngine::new());
        let hints = Arc::new(HintDetector::new(
            Arc::clone(&store) as Arc<dyn CallStore>,
            Arc::clone(&queue),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&store) as Arc<dyn CallStore>,
            Arc::clone(&engine),
            Arc::clone(&hints),
            queue,
            DedupeConfig::default(),
        );
        Fixture {
            store,
            engine,
            hints,
            reconciler,
        }
    }

    async fn seed_destination(store: &MemoryStore, call_id: &CallId, started_at: DateTime<Utc>) {
        store
            .upsert_call(
                call_id,
                CallPatch {
                    destination: Some(DestinationId::new("chat-1")),
                    ..CallPatch::default()
                },
                started_at,
            )
            .await
            .unwrap();
    }

    fn pin_stage() -> StageDefinition {
        StageDefinition {
            key: StageKey::new("pin"),
            label: "PIN".to_string(),
            length: LengthRule::Exact { length: 4 },
            rule: None,
            expected: None,
            prompt: "Enter PIN".to_string(),
            success_message: None,
            failure_message: None,
            max_attempts: 3,
            sensitive: true,
        }
    }

    /// Submitting the identical event twice within the window updates the
    /// session exactly once.
    #[tokio::test]
    async fn duplicate_within_window_is_absorbed() {
        let f = fixture();
        let call = CallId::new("CA123");
        // Pinned to a 5 s bucket boundary so the repeat two seconds later is
        // guaranteed to land in the same bucket.
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        seed_destination(&f.store, &call, now - ChronoDuration::seconds(45)).await;

        let first = f
            .reconciler
            .ingest(&call, "completed", serde_json::json!({}), now)
            .await
            .unwrap();
        assert!(first.accepted);
        assert!(first.is_terminal);
        assert!(first.outcome.is_some());

        let second = f
            .reconciler
            .ingest(&call, "completed", serde_json::json!({}), now + ChronoDuration::seconds(2))
            .await
            .unwrap();
        assert!(!second.accepted);
        assert!(second.outcome.is_none());

        // Exactly one audit row and one terminal notification.
        assert_eq!(f.store.event_count(&call), 1);
        let notifications = f.store.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].notification_type,
            NotificationType::CallCompleted
        );
    }

    /// Once terminal, no event changes the status or the outcome.
    #[tokio::test]
    async fn terminal_status_is_monotonic() {
        let f = fixture();
        let call = CallId::new("CA123");
        let now = Utc::now();
        seed_destination(&f.store, &call, now).await;

        f.reconciler
            .ingest(&call, "completed", serde_json::json!({}), now)
            .await
            .unwrap();

        // A different terminal status arriving later (outside the dedup
        // window by raw status) is audit-only.
        let late = f
            .reconciler
            .ingest(
                &call,
                "failed",
                serde_json::json!({"reason": "late carrier event"}),
                now + ChronoDuration::seconds(30),
            )
            .await
            .unwrap();
        assert!(late.accepted);
        assert!(late.outcome.is_none());

        let session = f.store.get_call(&call).await.unwrap().unwrap();
        assert_eq!(session.status, CanonicalStatus::Completed);
        let outcome = session.outcome.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.reason, OutcomeReason::Completed);

        // Both events are in the audit log.
        assert_eq!(f.store.event_count(&call), 2);
        // Still only one terminal notification.
        assert_eq!(f.store.notifications().len(), 1);

        // And a non-terminal regression is rejected the same way.
        f.reconciler
            .ingest(
                &call,
                "ringing",
                serde_json::json!({}),
                now + ChronoDuration::seconds(60),
            )
            .await
            .unwrap();
        let session = f.store.get_call(&call).await.unwrap().unwrap();
        assert_eq!(session.status, CanonicalStatus::Completed);
    }

    #[tokio::test]
    async fn duration_measured_from_session_start() {
        let f = fixture();
        let call = CallId::new("CA45");
        let started = Utc::now();
        seed_destination(&f.store, &call, started).await;

        let outcome = f
            .reconciler
            .ingest(
                &call,
                "completed",
                serde_json::json!({}),
                started + ChronoDuration::seconds(45),
            )
            .await
            .unwrap();

        assert!(outcome.outcome.unwrap().success);
        let session = f.store.get_call(&call).await.unwrap().unwrap();
        assert_eq!(session.duration_secs, Some(45));
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    async fn busy_no_answer_canceled_map_to_reason_codes() {
        for (raw, reason) in [
            ("busy", OutcomeReason::Busy),
            ("no-answer", OutcomeReason::NoAnswer),
            ("canceled", OutcomeReason::UserCanceled),
        ] {
            let f = fixture();
            let call = CallId::new("CA1");
            seed_destination(&f.store, &call, Utc::now()).await;

            let result = f
                .reconciler
                .ingest(&call, raw, serde_json::json!({}), Utc::now())
                .await
                .unwrap();
            let outcome = result.outcome.unwrap();
            assert!(!outcome.success);
            assert_eq!(outcome.reason, reason, "raw status {raw}");

            // Failure notifications are high priority.
            let notifications = f.store.notifications();
            assert_eq!(notifications.len(), 1);
            assert_eq!(
                notifications[0].notification_type,
                NotificationType::CallFailed
            );
            assert_eq!(notifications[0].priority, NotificationPriority::High);
        }
    }

    #[tokio::test]
    async fn provider_failure_reason_passes_through() {
        let f = fixture();
        let call = CallId::new("CA1");
        seed_destination(&f.store, &call, Utc::now()).await;

        let result = f
            .reconciler
            .ingest(
                &call,
                "failed",
                serde_json::json!({"reason": "carrier-rejected"}),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.outcome.unwrap().reason,
            OutcomeReason::Provider("carrier-rejected".to_string())
        );
    }

    #[tokio::test]
    async fn completed_with_unconfirmed_stages_fails_outcome() {
        let f = fixture();
        let call = CallId::new("CA1");
        seed_destination(&f.store, &call, Utc::now()).await;

        // Flow installed but never completed: the unreached stage counts as
        // unconfirmed.
        f.engine.start_flow(&call, vec![pin_stage()]).unwrap();

        let result = f
            .reconciler
            .ingest(&call, "completed", serde_json::json!({}), Utc::now())
            .await
            .unwrap();
        let outcome = result.outcome.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason, OutcomeReason::InputValidationFailed);

        // Terminal cleanup discarded the flow state.
        assert_eq!(f.engine.active_flows(), 0);
    }

    #[tokio::test]
    async fn unmapped_status_passes_through_without_terminal_effects() {
        let f = fixture();
        let call = CallId::new("CA1");
        seed_destination(&f.store, &call, Utc::now()).await;

        let result = f
            .reconciler
            .ingest(&call, "pre-dial", serde_json::json!({}), Utc::now())
            .await
            .unwrap();
        assert!(result.accepted);
        assert!(!result.is_terminal);
        assert_eq!(
            result.canonical_status,
            CanonicalStatus::Other("pre-dial".to_string())
        );

        let session = f.store.get_call(&call).await.unwrap().unwrap();
        assert_eq!(session.status, CanonicalStatus::Other("pre-dial".to_string()));
        assert!(session.outcome.is_none());
    }

    #[tokio::test]
    async fn answered_by_is_persisted_and_feeds_hints() {
        let f = fixture();
        let call = CallId::new("CA1");
        seed_destination(&f.store, &call, Utc::now()).await;

        f.reconciler
            .ingest(
                &call,
                "answered",
                serde_json::json!({"answered_by": "machine_start"}),
                Utc::now(),
            )
            .await
            .unwrap();

        let session = f.store.get_call(&call).await.unwrap().unwrap();
        assert_eq!(session.answered_by, AnsweredBy::Machine);

        let notifications = f.store.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].notification_type,
            NotificationType::MachineDetected
        );
    }

    #[tokio::test]
    async fn terminal_discards_hint_state() {
        let f = fixture();
        let call = CallId::new("CA1");
        seed_destination(&f.store, &call, Utc::now()).await;

        f.reconciler
            .ingest(
                &call,
                "answered",
                serde_json::json!({"answered_by": "human"}),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(f.hints.active_calls(), 1);

        f.reconciler
            .ingest(
                &call,
                "completed",
                serde_json::json!({}),
                Utc::now() + ChronoDuration::seconds(10),
            )
            .await
            .unwrap();
        assert_eq!(f.hints.active_calls(), 0);
    }

    /// A full lifecycle (initiated, ringing, answered by a human,
    /// in-progress, completed after 45 s with every input stage done)
    /// yields one successful outcome and one `caller_listening` hint.
    #[tokio::test]
    async fn end_to_end_call_lifecycle() {
        let f = fixture();
        let call = CallId::new("CA123");
        let start = Utc::now();
        seed_destination(&f.store, &call, start).await;

        let mut expected = pin_stage();
        expected.expected = Some("1234".to_string());
        f.engine.start_flow(&call, vec![expected]).unwrap();

        f.reconciler
            .ingest(&call, "initiated", serde_json::json!({}), start)
            .await
            .unwrap();
        f.reconciler
            .ingest(
                &call,
                "ringing",
                serde_json::json!({}),
                start + ChronoDuration::seconds(5),
            )
            .await
            .unwrap();
        f.reconciler
            .ingest(
                &call,
                "answered",
                serde_json::json!({"answered_by": "human"}),
                start + ChronoDuration::seconds(10),
            )
            .await
            .unwrap();
        f.reconciler
            .ingest(
                &call,
                "in-progress",
                serde_json::json!({"answered_by": "human"}),
                start + ChronoDuration::seconds(12),
            )
            .await
            .unwrap();

        // Caller keys in the expected digits.
        f.hints.on_keypad_event(&call).await;
        assert!(matches!(
            f.engine.submit(&call, "1234").unwrap(),
            crate::input::SubmitOutcome::FlowComplete
        ));

        let result = f
            .reconciler
            .ingest(
                &call,
                "completed",
                serde_json::json!({}),
                start + ChronoDuration::seconds(45),
            )
            .await
            .unwrap();

        let outcome = result.outcome.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.reason, OutcomeReason::Completed);

        let session = f.store.get_call(&call).await.unwrap().unwrap();
        assert_eq!(session.duration_secs, Some(45));

        let types: Vec<NotificationType> = f
            .store
            .notifications()
            .into_iter()
            .map(|r| r.notification_type)
            .collect();
        let listening = types
            .iter()
            .filter(|t| **t == NotificationType::CallerListening)
            .count();
        assert_eq!(listening, 1, "caller_listening emitted exactly once");
        assert!(types.contains(&NotificationType::InputDetected));
        assert!(types.contains(&NotificationType::CallCompleted));
    }
}
