//! Error taxonomy for the EBRX compliance core.
//!
//! All fallible operations return `ComplianceResult<T>`. Every rejected
//! action carries the specific violated precondition — callers never see a
//! generic failure, and nothing is silently swallowed.

use thiserror::Error;

/// The unified error type for the compliance core.
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// Malformed or incomplete input. Recoverable: the caller corrects the
    /// request and retries.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Optimistic-concurrency version mismatch: someone else transitioned the
    /// record first. Recoverable: the caller refetches and retries.
    #[error("version conflict on '{record_id}': expected version {expected}, found {actual}")]
    Conflict {
        record_id: String,
        expected: u64,
        actual: u64,
    },

    /// The actor's role lacks the required signing capability. Not retryable
    /// without a different actor.
    #[error("actor '{actor}' with role '{role}' is not authorized to {action}")]
    Authorization {
        actor: String,
        role: String,
        action: String,
    },

    /// A hash-chain mismatch was detected.
    ///
    /// Fatal to further writes on the affected ledger: appends are refused
    /// until the hold is cleared by an explicit, itself-audited
    /// administrative action. Silently continuing would extend a compromised
    /// chain.
    #[error("audit chain integrity violation at sequence {sequence}: {detail}")]
    Integrity { sequence: u64, detail: String },

    /// The referenced entity or record does not exist.
    #[error("{entity_kind} '{entity_id}' not found")]
    NotFound {
        entity_kind: String,
        entity_id: String,
    },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the EBRX crates.
pub type ComplianceResult<T> = Result<T, ComplianceError>;
