//! Notification dispatch: the durable queue, its periodic delivery loops,
//! and the delivery channel interface.

pub mod channel;
pub mod queue;

pub use channel::{DeliveryChannel, DeliveryError, DeliveryReceipt, LogChannel};
pub use queue::{DispatchConfig, DispatchQueue, StatsSnapshot};
