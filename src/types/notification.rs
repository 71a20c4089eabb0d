//! Notification record and delivery lifecycle types.
//!
//! A [`NotificationRecord`] is the queued unit of outbound messaging. Records
//! are created by the reconciler, the input engine wiring, and the hint
//! detector; mutated only by the dispatch queue; never deleted (kept for
//! audit).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CallId, DestinationId, NotificationId};

/// Business event carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Call reached a terminal status with a successful outcome.
    CallCompleted,

    /// Call reached a terminal status with a failed outcome.
    CallFailed,

    /// Answering-machine detection classified the callee as a machine.
    MachineDetected,

    /// A human is on the line.
    CallerListening,

    /// The callee pressed a key.
    InputDetected,

    /// Every input stage completed successfully.
    InputFlowCompleted,

    /// An input stage exhausted its retry budget.
    InputFlowFailed,
}

/// Delivery priority.
///
/// Higher priorities are informational today (the queue drains oldest-first);
/// the ordering exists so a channel or a future scheduler can act on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

/// Delivery lifecycle state of a notification record.
///
/// ```text
/// pending --> sent
///    |          ^
///    v          |
///  failed --> retrying --> failed (terminal after the retry budget)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
    Retrying,
}

/// One queued outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Store-assigned ID; zero until enqueued.
    pub id: NotificationId,

    pub call_id: CallId,
    pub notification_type: NotificationType,

    /// Serialized business payload handed to the rendering collaborator.
    pub payload: serde_json::Value,

    pub destination: DestinationId,

    pub state: DeliveryState,

    /// Detail of the most recent delivery failure, if any.
    pub error: Option<String>,

    /// Number of delivery attempts after the first.
    pub retry_count: u32,

    pub priority: NotificationPriority,

    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,

    /// Channel-assigned message ID of the successful delivery.
    pub message_id: Option<String>,

    /// Wall-clock milliseconds the successful delivery took.
    pub delivery_latency_ms: Option<u64>,
}

impl NotificationRecord {
    /// Creates a pending record ready for `CallStore::enqueue_notification`.
    pub fn new(
        call_id: CallId,
        notification_type: NotificationType,
        payload: serde_json::Value,
        destination: DestinationId,
        priority: NotificationPriority,
        created_at: DateTime<Utc>,
    ) -> Self {
        NotificationRecord {
            id: NotificationId(0),
            call_id,
            notification_type,
            payload,
            destination,
            state: DeliveryState::Pending,
            error: None,
            retry_count: 0,
            priority,
            created_at,
            sent_at: None,
            message_id: None,
            delivery_latency_ms: None,
        }
    }
}
