//! Provider webhook processing: signature verification, status
//! canonicalization, duplicate suppression, and session reconciliation.

pub mod canonical;
pub mod dedupe;
pub mod reconciler;
pub mod signature;

pub use canonical::canonicalize;
pub use dedupe::{DedupeWindow, EventSignature};
pub use reconciler::{DedupeConfig, IngestOutcome, Reconciler};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
