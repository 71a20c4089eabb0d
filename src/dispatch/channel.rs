//! Delivery channel interface.
//!
//! The core does not render human-facing text and does not prescribe a
//! transport: it hands the notification record (type + payload +
//! destination) to a channel, which renders and delivers it. Channels
//! classify failures as retryable or permanent; a destination-level
//! rejection will not succeed on retry, so permanent failures short-circuit
//! the retry budget.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::types::{DestinationId, NotificationRecord};

/// Delivery failure, classified for retry handling.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Transient failure (timeout, rate limit, upstream hiccup); consumes a
    /// retry slot.
    #[error("retryable delivery failure: {0}")]
    Retryable(String),

    /// Permanent failure (invalid destination, hard rejection); retrying
    /// cannot succeed.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

/// Receipt for a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Channel-assigned message ID.
    pub message_id: String,

    /// Wall-clock milliseconds the delivery took, as observed by the channel.
    pub latency_ms: u64,
}

/// An outbound delivery channel (chat bot, SMS gateway, …).
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(
        &self,
        destination: &DestinationId,
        record: &NotificationRecord,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Channel that logs deliveries instead of sending them.
///
/// The default wiring for deployments without a configured channel; every
/// delivery succeeds with a synthetic message ID.
pub struct LogChannel {
    counter: AtomicU64,
}

impl LogChannel {
    pub fn new() -> Self {
        LogChannel {
            counter: AtomicU64::new(1),
        }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn send(
        &self,
        destination: &DestinationId,
        record: &NotificationRecord,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        info!(
            destination = %destination,
            call_id = %record.call_id,
            notification_type = ?record.notification_type,
            "log-only delivery"
        );
        Ok(DeliveryReceipt {
            message_id: format!("log-{n}"),
            latency_ms: 0,
        })
    }
}
