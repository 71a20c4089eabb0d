//! Call-session record and status lattice types.
//!
//! These types represent the canonical state of one call attempt and the
//! terminal outcome computed when the call finishes.
//!
//! INVARIANT: the canonical status only moves forward. A session that has
//! reached a terminal status is never transitioned to a different terminal
//! status or back to a non-terminal one (see the reconciler's transition
//! guard).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CallId, DestinationId};

/// The canonical call lifecycle status, independent of any provider's native
/// vocabulary.
///
/// Provider statuses the canonicalizer does not recognize pass through
/// unchanged as [`CanonicalStatus::Other`] so new provider vocabulary never
/// drops events on the floor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalStatus {
    /// Call created at the provider; not yet ringing.
    Initiated,

    /// Callee's phone is ringing.
    Ringing,

    /// Callee (human or machine) picked up.
    Answered,

    /// Call is connected and media is flowing.
    InProgress,

    /// Call finished normally.
    Completed,

    /// Callee line was busy.
    Busy,

    /// Callee never picked up.
    NoAnswer,

    /// Call was canceled before connecting.
    Canceled,

    /// Provider-side failure.
    Failed,

    /// Unmapped provider status, passed through for forward compatibility.
    #[serde(untagged)]
    Other(String),
}

impl CanonicalStatus {
    /// Returns true if the call cannot transition further from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalStatus::Completed
                | CanonicalStatus::Busy
                | CanonicalStatus::NoAnswer
                | CanonicalStatus::Canceled
                | CanonicalStatus::Failed
        )
    }

    /// Returns the canonical wire string for this status.
    pub fn as_str(&self) -> &str {
        match self {
            CanonicalStatus::Initiated => "initiated",
            CanonicalStatus::Ringing => "ringing",
            CanonicalStatus::Answered => "answered",
            CanonicalStatus::InProgress => "in-progress",
            CanonicalStatus::Completed => "completed",
            CanonicalStatus::Busy => "busy",
            CanonicalStatus::NoAnswer => "no-answer",
            CanonicalStatus::Canceled => "canceled",
            CanonicalStatus::Failed => "failed",
            CanonicalStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who (or what) answered the call, as classified by the provider's
/// answering-machine detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnsweredBy {
    Human,
    Machine,
    #[default]
    Unknown,
}

impl AnsweredBy {
    /// Classifies a provider `AnsweredBy` string.
    ///
    /// Providers report machine detection with refinements
    /// (`machine_start`, `machine_end_beep`, `fax`, …); anything
    /// machine-like collapses to [`AnsweredBy::Machine`].
    pub fn from_provider(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("machine") || lower == "fax" {
            AnsweredBy::Machine
        } else if lower == "human" {
            AnsweredBy::Human
        } else {
            AnsweredBy::Unknown
        }
    }
}

/// Reason code attached to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Call completed with every input stage confirmed.
    Completed,

    /// Call completed but at least one input stage was unconfirmed.
    InputValidationFailed,

    Busy,
    NoAnswer,
    UserCanceled,

    /// Provider-supplied failure reason, passed through verbatim.
    #[serde(untagged)]
    Provider(String),
}

impl OutcomeReason {
    pub fn as_str(&self) -> &str {
        match self {
            OutcomeReason::Completed => "completed",
            OutcomeReason::InputValidationFailed => "input_validation_failed",
            OutcomeReason::Busy => "busy",
            OutcomeReason::NoAnswer => "no_answer",
            OutcomeReason::UserCanceled => "user_canceled",
            OutcomeReason::Provider(s) => s,
        }
    }
}

/// The terminal outcome of a call, computed exactly once when the session
/// transitions into a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub success: bool,
    pub reason: OutcomeReason,
    pub completed_at: DateTime<Utc>,
}

/// Durable record of one call attempt.
///
/// Owned by the session store; mutated only through the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: CallId,

    /// Canonical status (forward-only, see module docs).
    pub status: CanonicalStatus,

    /// The provider's native status string, kept verbatim for audit.
    pub provider_status: String,

    pub answered_by: AnsweredBy,

    /// Where notifications about this call are delivered. Sessions without a
    /// destination produce no notifications or hints.
    pub destination: Option<DestinationId>,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Elapsed seconds from `started_at` to the terminal event.
    pub duration_secs: Option<i64>,

    pub outcome: Option<CallOutcome>,

    pub recording_available: bool,
    pub transcript_available: bool,
}

impl CallSession {
    /// Creates a fresh session record for a newly-seen call.
    pub fn new(call_id: CallId, started_at: DateTime<Utc>) -> Self {
        CallSession {
            call_id,
            status: CanonicalStatus::Initiated,
            provider_status: String::new(),
            answered_by: AnsweredBy::Unknown,
            destination: None,
            started_at,
            ended_at: None,
            duration_secs: None,
            outcome: None,
            recording_available: false,
            transcript_available: false,
        }
    }

    /// Builder-style destination assignment, used when originating a call.
    pub fn with_destination(mut self, destination: DestinationId) -> Self {
        self.destination = Some(destination);
        self
    }
}

/// Partial update applied to a [`CallSession`] via `CallStore::upsert_call`.
///
/// `None` fields leave the session untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallPatch {
    pub status: Option<CanonicalStatus>,
    pub provider_status: Option<String>,
    pub answered_by: Option<AnsweredBy>,
    pub destination: Option<DestinationId>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub outcome: Option<CallOutcome>,
    pub recording_available: Option<bool>,
    pub transcript_available: Option<bool>,
}

impl CallPatch {
    /// Applies every set field to the session.
    pub fn apply(self, session: &mut CallSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(provider_status) = self.provider_status {
            session.provider_status = provider_status;
        }
        if let Some(answered_by) = self.answered_by {
            session.answered_by = answered_by;
        }
        if let Some(destination) = self.destination {
            session.destination = Some(destination);
        }
        if let Some(ended_at) = self.ended_at {
            session.ended_at = Some(ended_at);
        }
        if let Some(duration_secs) = self.duration_secs {
            session.duration_secs = Some(duration_secs);
        }
        if let Some(outcome) = self.outcome {
            session.outcome = Some(outcome);
        }
        if let Some(recording_available) = self.recording_available {
            session.recording_available = recording_available;
        }
        if let Some(transcript_available) = self.transcript_available {
            session.transcript_available = transcript_available;
        }
    }
}

/// One row in the append-only webhook audit log.
///
/// Never updated or deleted; used for audit and reconciliation disputes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub call_id: CallId,
    pub status: CanonicalStatus,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
