//! Provider status canonicalization.
//!
//! Call providers each speak their own status vocabulary; this module maps
//! those strings onto the small [`CanonicalStatus`] enum used everywhere
//! else. Unrecognized statuses pass through unchanged as
//! [`CanonicalStatus::Other`] so a provider rolling out new vocabulary
//! degrades to audit-only handling instead of dropped events.

use crate::types::CanonicalStatus;

/// Maps a provider-native status string to its canonical status.
///
/// Matching is case-insensitive and tolerant of `-`/`_` separator
/// differences. Unmapped strings are passed through verbatim (original
/// casing preserved) as [`CanonicalStatus::Other`].
pub fn canonicalize(raw: &str) -> CanonicalStatus {
    let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
    match normalized.as_str() {
        "queued" | "initiated" => CanonicalStatus::Initiated,
        "ringing" => CanonicalStatus::Ringing,
        "answered" => CanonicalStatus::Answered,
        "in-progress" => CanonicalStatus::InProgress,
        "completed" => CanonicalStatus::Completed,
        "busy" => CanonicalStatus::Busy,
        "no-answer" => CanonicalStatus::NoAnswer,
        "canceled" | "cancelled" => CanonicalStatus::Canceled,
        "failed" => CanonicalStatus::Failed,
        _ => CanonicalStatus::Other(raw.trim().to_string()),
    }
}
