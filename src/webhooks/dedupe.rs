//! Duplicate suppression for provider status callbacks.
//!
//! Providers retransmit status callbacks on timeouts and network errors, so
//! the same logical event can arrive several times. This module derives a
//! stable signature for each event and keeps a TTL-bounded seen-set so
//! repeats within the window are absorbed without side effects.
//!
//! # Signature
//!
//! The signature is a SHA-256 digest over `(call id, raw status string,
//! received-time bucketed to a fixed width)`. Bucketing the timestamp means
//! a retransmission a few seconds later still collides with the original,
//! while a legitimate repeat of the same status minutes later (e.g. a second
//! `ringing` after a redial) does not.
//!
//! # TTL-based expiration
//!
//! Seen signatures expire after a fixed TTL independent of call lifecycle,
//! keeping the map bounded. Expiration is driven by [`DedupeWindow::prune`],
//! which the reconciler invokes on every ingest.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::types::CallId;

/// Default width of the time bucket used for signature computation (5 s).
pub const DEFAULT_BUCKET: Duration = Duration::from_secs(5);

/// Default retention for seen signatures (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A stable signature identifying one logical status event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSignature(String);

impl EventSignature {
    /// Computes the signature for an event received at `now`.
    pub fn compute(call_id: &CallId, raw_status: &str, now: DateTime<Utc>, bucket: Duration) -> Self {
        let bucket_secs = bucket.as_secs().max(1) as i64;
        let bucket_index = now.timestamp().div_euclid(bucket_secs);

        let mut hasher = Sha256::new();
        hasher.update(call_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(raw_status.as_bytes());
        hasher.update([0u8]);
        hasher.update(bucket_index.to_be_bytes());

        EventSignature(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// TTL-bounded seen-set of event signatures.
///
/// Process-local: a restart forgets the window, which at worst lets one
/// retransmission through to the (idempotent) reconciler.
#[derive(Debug)]
pub struct DedupeWindow {
    seen: HashMap<EventSignature, DateTime<Utc>>,
    ttl: Duration,
}

impl DedupeWindow {
    pub fn new(ttl: Duration) -> Self {
        DedupeWindow {
            seen: HashMap::new(),
            ttl,
        }
    }

    /// Returns `true` if the signature was seen within the TTL, meaning this
    /// event is a duplicate and must be skipped.
    pub fn is_duplicate(&self, signature: &EventSignature, now: DateTime<Utc>) -> bool {
        match self.seen.get(signature) {
            Some(seen_at) => {
                let age = now.signed_duration_since(*seen_at);
                age.to_std().map(|age| age <= self.ttl).unwrap_or(true)
            }
            None => false,
        }
    }

    /// Records a signature as seen at `now`.
    pub fn mark_seen(&mut self, signature: EventSignature, now: DateTime<Utc>) {
        self.seen.insert(signature, now);
    }

    /// Drops signatures older than the TTL. Returns the number pruned.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::minutes(5));
        let cutoff = now - ttl;
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| *seen_at > cutoff);
        before - self.seen.len()
    }

    /// Number of signatures currently retained.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + ChronoDuration::seconds(secs)
    }

    fn aligned_base() -> DateTime<Utc> {
        // Pin to a bucket boundary so in-bucket/out-of-bucket offsets in the
        // tests below are exact.
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn same_bucket_same_signature() {
        let base = aligned_base();
        let call = CallId::new("CA123");

        let a = EventSignature::compute(&call, "completed", at(base, 0), DEFAULT_BUCKET);
        let b = EventSignature::compute(&call, "completed", at(base, 4), DEFAULT_BUCKET);
        assert_eq!(a, b);
    }

    #[test]
    fn different_bucket_different_signature() {
        let base = aligned_base();
        let call = CallId::new("CA123");

        let a = EventSignature::compute(&call, "completed", at(base, 0), DEFAULT_BUCKET);
        let b = EventSignature::compute(&call, "completed", at(base, 5), DEFAULT_BUCKET);
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_detected_within_ttl() {
        let base = aligned_base();
        let call = CallId::new("CA123");
        let mut window = DedupeWindow::new(DEFAULT_TTL);

        let sig = EventSignature::compute(&call, "completed", at(base, 0), DEFAULT_BUCKET);
        assert!(!window.is_duplicate(&sig, at(base, 0)));

        window.mark_seen(sig.clone(), at(base, 0));
        assert!(window.is_duplicate(&sig, at(base, 2)));
        // Past the TTL the signature no longer suppresses.
        assert!(!window.is_duplicate(&sig, at(base, 301)));
    }

    #[test]
    fn prune_drops_only_expired() {
        let base = aligned_base();
        let mut window = DedupeWindow::new(DEFAULT_TTL);

        let old = EventSignature::compute(&CallId::new("CA1"), "ringing", base, DEFAULT_BUCKET);
        let fresh =
            EventSignature::compute(&CallId::new("CA2"), "ringing", at(base, 400), DEFAULT_BUCKET);

        window.mark_seen(old.clone(), base);
        window.mark_seen(fresh.clone(), at(base, 400));

        let pruned = window.prune(at(base, 420));
        assert_eq!(pruned, 1);
        assert_eq!(window.len(), 1);
        assert!(!window.is_duplicate(&old, at(base, 420)));
        assert!(window.is_duplicate(&fresh, at(base, 420)));
    }

    proptest! {
        /// Signatures are deterministic.
        #[test]
        fn signature_deterministic(
            call in "[A-Z]{2}[0-9a-f]{8}",
            status in "[a-z-]{1,16}",
            ts in 946_684_800i64..4_102_444_800i64,
        ) {
            let call = CallId::new(&call);
            let now = DateTime::from_timestamp(ts, 0).unwrap();
            let a = EventSignature::compute(&call, &status, now, DEFAULT_BUCKET);
            let b = EventSignature::compute(&call, &status, now, DEFAULT_BUCKET);
            prop_assert_eq!(a, b);
        }

        /// Different calls never collide.
        #[test]
        fn different_calls_different_signatures(
            call_a in "[A-Z]{2}[0-9a-f]{8}",
            call_b in "[A-Z]{2}[0-9a-f]{8}",
            status in "[a-z-]{1,16}",
            ts in 946_684_800i64..4_102_444_800i64,
        ) {
            prop_assume!(call_a != call_b);
            let now = DateTime::from_timestamp(ts, 0).unwrap();
            let a = EventSignature::compute(&CallId::new(&call_a), &status, now, DEFAULT_BUCKET);
            let b = EventSignature::compute(&CallId::new(&call_b), &status, now, DEFAULT_BUCKET);
            prop_assert_ne!(a, b);
        }

        /// Different raw statuses never collide, even when one embeds the
        /// other as a prefix (the digest input is NUL-delimited).
        #[test]
        fn different_statuses_different_signatures(
            call in "[A-Z]{2}[0-9a-f]{8}",
            status_a in "[a-z-]{1,16}",
            status_b in "[a-z-]{1,16}",
            ts in 946_684_800i64..4_102_444_800i64,
        ) {
            prop_assume!(status_a != status_b);
            let call = CallId::new(&call);
            let now = DateTime::from_timestamp(ts, 0).unwrap();
            let a = EventSignature::compute(&call, &status_a, now, DEFAULT_BUCKET);
            let b = EventSignature::compute(&call, &status_b, now, DEFAULT_BUCKET);
            prop_assert_ne!(a, b);
        }

        /// Marked signatures are duplicates until pruned.
        #[test]
        fn marked_is_duplicate(
            call in "[A-Z]{2}[0-9a-f]{8}",
            status in "[a-z-]{1,16}",
        ) {
            let call = CallId::new(&call);
            let now = Utc::now();
            let mut window = DedupeWindow::default();
            let sig = EventSignature::compute(&call, &status, now, DEFAULT_BUCKET);

            prop_assert!(!window.is_duplicate(&sig, now));
            window.mark_seen(sig.clone(), now);
            prop_assert!(window.is_duplicate(&sig, now));

            let pruned = window.prune(now + ChronoDuration::seconds(301));
            prop_assert_eq!(pruned, 1);
            prop_assert!(window.is_empty());
        }
    }
}
