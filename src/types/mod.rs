//! Core domain types for the call-session service.
//!
//! This module contains the newtype identifiers, the call-session record
//! with its canonical status lattice, and the notification record types.

pub mod call;
pub mod ids;
pub mod notification;

pub use call::{
    AnsweredBy, CallOutcome, CallPatch, CallSession, CanonicalStatus, OutcomeReason, WebhookEvent,
};
pub use ids::{CallId, DestinationId, NotificationId, StageKey};
pub use notification::{
    DeliveryState, NotificationPriority, NotificationRecord, NotificationType,
};
