//! Persistence interface for call sessions, the webhook audit log, and the
//! notification queue.
//!
//! The backing store is deliberately abstract: the core only needs the narrow
//! [`CallStore`] contract. [`MemoryStore`] is the reference implementation,
//! used by the test suite and by single-process deployments.
//!
//! # Serialization point
//!
//! The store allows unserialized concurrent reads; writers are expected to
//! serialize per call (the reconciler holds a per-call critical section
//! around its read-modify-write cycle).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;

use crate::types::{
    CallId, CallPatch, CallSession, DeliveryState, NotificationId, NotificationRecord,
    WebhookEvent,
};

/// Errors surfaced by the persistence layer.
///
/// Store failures are transient from the caller's perspective: the webhook
/// entry point still acknowledges the provider, and the dispatch loops retry
/// on their next tick.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced notification does not exist.
    #[error("notification {0} not found")]
    NotificationNotFound(NotificationId),

    /// Backend I/O failure (connection loss, timeout, …).
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Policy parameters for selecting failed notifications eligible for retry.
///
/// Owned by the dispatch queue's configuration; passed down so the store can
/// evaluate eligibility in one scan.
#[derive(Debug, Clone, Copy)]
pub struct RetryEligibility {
    /// Records with `retry_count >= max_attempts` are never selected.
    pub max_attempts: u32,

    /// A record becomes eligible at `created_at + retry_count * backoff_step`.
    pub backoff_step: std::time::Duration,
}

/// Fields updated on a notification record by the dispatch queue.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct NotificationUpdate {
    pub state: Option<DeliveryState>,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: Option<u32>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivery_latency_ms: Option<u64>,
}

/// The persistence contract consumed by the core components.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Fetches a call session, or `None` if the call has never been seen.
    async fn get_call(&self, call_id: &CallId) -> Result<Option<CallSession>>;

    /// Applies a partial update to a call session, creating the session
    /// first (with `now` as its start timestamp) if it does not exist.
    /// Returns the session after the update.
    async fn upsert_call(
        &self,
        call_id: &CallId,
        patch: CallPatch,
        now: DateTime<Utc>,
    ) -> Result<CallSession>;

    /// Appends one row to the append-only webhook event log.
    async fn append_event(&self, event: WebhookEvent) -> Result<()>;

    /// Persists a notification record, assigning its ID.
    async fn enqueue_notification(&self, record: NotificationRecord) -> Result<NotificationId>;

    /// Fetches up to `limit` pending notifications, oldest first.
    async fn fetch_pending_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>>;

    /// Applies a partial update to a notification record.
    async fn update_notification(
        &self,
        id: NotificationId,
        update: NotificationUpdate,
    ) -> Result<()>;

    /// Fetches up to `limit` failed notifications whose retry is due under
    /// the given eligibility policy, oldest first.
    async fn fetch_failed_retryable(
        &self,
        limit: usize,
        policy: RetryEligibility,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>>;
}

/// In-memory [`CallStore`] implementation.
struct MemoryStoreInner {
    calls: HashMap<CallId, CallSession>,
    events: Vec<WebhookEvent>,
    notifications: Vec<NotificationRecord>,
    next_notification_id: u64,
}

/// In-memory store for tests and single-process deployments.
///
/// All state is process-local and lost on restart; the durable-store
/// guarantees of the service only hold as far as this process lives.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Mutex::new(MemoryStoreInner {
                calls: HashMap::new(),
                events: Vec::new(),
                notifications: Vec::new(),
                next_notification_id: 1,
            }),
        }
    }

    /// Number of audit-log rows recorded for a call.
    pub fn event_count(&self, call_id: &CallId) -> usize {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.events.iter().filter(|e| &e.call_id == call_id).count()
    }

    /// Snapshot of every notification record, in enqueue order.
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.notifications.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn get_call(&self, call_id: &CallId) -> Result<Option<CallSession>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.calls.get(call_id).cloned())
    }

    async fn upsert_call(
        &self,
        call_id: &CallId,
        patch: CallPatch,
        now: DateTime<Utc>,
    ) -> Result<CallSession> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let session = inner
            .calls
            .entry(call_id.clone())
            .or_insert_with(|| CallSession::new(call_id.clone(), now));
        patch.apply(session);
        Ok(session.clone())
    }

    async fn append_event(&self, event: WebhookEvent) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.events.push(event);
        Ok(())
    }

    async fn enqueue_notification(&self, mut record: NotificationRecord) -> Result<NotificationId> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let id = NotificationId(inner.next_notification_id);
        inner.next_notification_id += 1;
        record.id = id;
        inner.notifications.push(record);
        Ok(id)
    }

    async fn fetch_pending_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut pending: Vec<NotificationRecord> = inner
            .notifications
            .iter()
            .filter(|r| r.state == DeliveryState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_notification(
        &self,
        id: NotificationId,
        update: NotificationUpdate,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let record = inner
            .notifications
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotificationNotFound(id))?;

        if let Some(state) = update.state {
            record.state = state;
        }
        if let Some(message_id) = update.message_id {
            record.message_id = Some(message_id);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        if let Some(retry_count) = update.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(sent_at) = update.sent_at {
            record.sent_at = Some(sent_at);
        }
        if let Some(latency) = update.delivery_latency_ms {
            record.delivery_latency_ms = Some(latency);
        }
        Ok(())
    }

    async fn fetch_failed_retryable(
        &self,
        limit: usize,
        policy: RetryEligibility,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>> {
        let backoff_step = ChronoDuration::from_std(policy.backoff_step)
            .unwrap_or_else(|_| ChronoDuration::minutes(10));

        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut eligible: Vec<NotificationRecord> = inner
            .notifications
            .iter()
            .filter(|r| {
                r.state == DeliveryState::Failed
                    && r.retry_count < policy.max_attempts
                    && r.created_at + backoff_step * (r.retry_count as i32) <= now
            })
            .cloned()
            .collect();
        eligible.sort_by_key(|r| r.created_at);
        eligible.truncate(limit);
        Ok(eligible)
    }
}
