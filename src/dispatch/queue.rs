//! Notification dispatch queue.
//!
//! Durable at-least-once delivery of queued notifications through the
//! delivery channel:
//!
//! - `drain_pending` runs on a short interval and delivers the oldest
//!   pending records in bounded batches, with a small inter-message delay to
//!   avoid destination rate limiting.
//! - `retry_failed` runs on a longer interval and re-attempts failed records
//!   whose scheduled retry time (`created_at + retry_count × backoff step`)
//!   has passed, up to the attempt ceiling. Records that exhaust the ceiling
//!   stay `failed` for manual review.
//! - Permanent delivery errors short-circuit to the ceiling immediately; a
//!   destination-level rejection will not succeed on retry.
//!
//! The queue is an explicitly constructed component with an explicit
//! lifecycle: [`DispatchQueue::start`] spawns the two periodic loops, and a
//! [`CancellationToken`] stops them between batches (an in-flight batch
//! always finishes: graceful shutdown, not abrupt termination).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{CallStore, NotificationUpdate, Result, RetryEligibility};
use crate::types::{DeliveryState, NotificationId, NotificationRecord};

use super::channel::DeliveryChannel;

/// Timing and batching configuration for the dispatch loops.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Interval between pending-drain passes.
    pub drain_interval: Duration,

    /// Interval between failed-retry passes.
    pub retry_interval: Duration,

    /// Maximum pending records delivered per drain pass.
    pub drain_batch: usize,

    /// Maximum failed records re-attempted per retry pass.
    pub retry_batch: usize,

    /// Pause between consecutive deliveries within a batch.
    pub inter_message_delay: Duration,

    /// Attempt ceiling: records at this retry count are left failed.
    pub max_attempts: u32,

    /// A failed record becomes retry-eligible at
    /// `created_at + retry_count × backoff_step`.
    pub backoff_step: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            drain_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(300),
            drain_batch: 10,
            retry_batch: 10,
            inter_message_delay: Duration::from_millis(500),
            max_attempts: 3,
            backoff_step: Duration::from_secs(600),
        }
    }
}

/// Running counters maintained for observability.
#[derive(Debug, Default)]
struct DispatchStats {
    processed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Point-in-time view of the dispatch statistics, exposed by the health read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
}

/// The notification dispatch queue.
pub struct DispatchQueue {
    store: Arc<dyn CallStore>,
    channel: Arc<dyn DeliveryChannel>,
    config: DispatchConfig,
    stats: DispatchStats,
}

impl DispatchQueue {
    pub fn new(
        store: Arc<dyn CallStore>,
        channel: Arc<dyn DeliveryChannel>,
        config: DispatchConfig,
    ) -> Self {
        DispatchQueue {
            store,
            channel,
            config,
            stats: DispatchStats::default(),
        }
    }

    /// Persists a notification with status `pending`; the next drain pass
    /// picks it up.
    pub async fn enqueue(&self, record: NotificationRecord) -> Result<NotificationId> {
        let id = self.store.enqueue_notification(record).await?;
        debug!(notification_id = %id, "notification enqueued");
        Ok(id)
    }

    /// Delivers one batch of the oldest pending notifications.
    ///
    /// Returns the number of records attempted. Storage failures surface as
    /// errors; delivery failures are absorbed into record state.
    pub async fn drain_pending(&self) -> Result<usize> {
        let batch = self
            .store
            .fetch_pending_notifications(self.config.drain_batch)
            .await?;

        let count = batch.len();
        for (i, record) in batch.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_message_delay).await;
            }
            self.attempt(record, None).await?;
        }
        Ok(count)
    }

    /// Re-attempts one batch of failed notifications whose retry is due.
    ///
    /// Each record is marked `retrying` while in flight and its retry count
    /// is incremented on the pass, so the ceiling is enforced by selection.
    pub async fn retry_failed(&self) -> Result<usize> {
        let policy = RetryEligibility {
            max_attempts: self.config.max_attempts,
            backoff_step: self.config.backoff_step,
        };
        let batch = self
            .store
            .fetch_failed_retryable(self.config.retry_batch, policy, Utc::now())
            .await?;

        let count = batch.len();
        for (i, record) in batch.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_message_delay).await;
            }

            let next_retry_count = record.retry_count + 1;
            self.store
                .update_notification(
                    record.id,
                    NotificationUpdate {
                        state: Some(DeliveryState::Retrying),
                        ..NotificationUpdate::default()
                    },
                )
                .await?;
            self.stats.retried.fetch_add(1, Ordering::Relaxed);

            self.attempt(record, Some(next_retry_count)).await?;
        }
        Ok(count)
    }

    /// One delivery attempt. `retry_count` is the value to persist with the
    /// outcome when this is a retry pass.
    async fn attempt(&self, record: NotificationRecord, retry_count: Option<u32>) -> Result<()> {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let outcome = self.channel.send(&record.destination, &record).await;

        match outcome {
            Ok(receipt) => {
                let latency_ms = if receipt.latency_ms > 0 {
                    receipt.latency_ms
                } else {
                    started.elapsed().as_millis() as u64
                };
                self.store
                    .update_notification(
                        record.id,
                        NotificationUpdate {
                            state: Some(DeliveryState::Sent),
                            message_id: Some(receipt.message_id),
                            retry_count,
                            sent_at: Some(Utc::now()),
                            delivery_latency_ms: Some(latency_ms),
                            ..NotificationUpdate::default()
                        },
                    )
                    .await?;
                self.stats.successful.fetch_add(1, Ordering::Relaxed);
                debug!(notification_id = %record.id, latency_ms, "notification delivered");
            }
            Err(error) => {
                // Permanent rejections exhaust the budget immediately; no
                // amount of retrying fixes an invalid destination.
                let final_retry_count = if error.is_permanent() {
                    Some(self.config.max_attempts)
                } else {
                    retry_count
                };
                self.store
                    .update_notification(
                        record.id,
                        NotificationUpdate {
                            state: Some(DeliveryState::Failed),
                            error: Some(error.to_string()),
                            retry_count: final_retry_count,
                            ..NotificationUpdate::default()
                        },
                    )
                    .await?;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    notification_id = %record.id,
                    destination = %record.destination,
                    permanent = error.is_permanent(),
                    error = %error,
                    "notification delivery failed"
                );
            }
        }
        Ok(())
    }

    /// Current statistics, for the health read.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.stats.processed.load(Ordering::Relaxed),
            successful: self.stats.successful.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
        }
    }

    /// Spawns the drain and retry loops. Both observe `shutdown` between
    /// batches only, so in-flight work always completes.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let drain = {
            let queue = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(queue.config.drain_interval) => {
                            if let Err(error) = queue.drain_pending().await {
                                warn!(error = %error, "drain pass failed");
                            }
                        }
                    }
                }
                info!("dispatch drain loop stopped");
            })
        };

        let retry = {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(queue.config.retry_interval) => {
                            if let Err(error) = queue.retry_failed().await {
                                warn!(error = %error, "retry pass failed");
                            }
                        }
                    }
                }
                info!("dispatch retry loop stopped");
            })
        };

        vec![drain, retry]
    }
}
