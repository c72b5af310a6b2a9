//! Electronic signature types (Part 11 subpart C).
//!
//! A signature binds a signer, a declared meaning, and the content hash of
//! the exact record version being signed. Mutating the record afterwards
//! invalidates the signature — verification fails, it does not warn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;

/// Unique identifier for an issued electronic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureId(pub uuid::Uuid);

impl SignatureId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SignatureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SignatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The declared intent of a signature.
///
/// A closed set: the signing policy grants each role a subset of these, and
/// a signature's meaning can never be reinterpreted after issuance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SigningMeaning {
    /// "I performed this step."
    Performed,
    /// "I reviewed this record." Used for the QC review gate.
    Reviewed,
    /// General approval of an intermediate record.
    Approved,
    /// QA batch release approval — the final disposition gate.
    ReleaseApproval,
    /// QA batch rejection.
    Rejection,
    /// Sign-off closing a deviation.
    DeviationClosure,
}

impl SigningMeaning {
    /// Meanings that represent a disposition decision must carry a written
    /// justification at signing time.
    pub fn requires_reason(self) -> bool {
        matches!(
            self,
            Self::ReleaseApproval | Self::Rejection | Self::DeviationClosure
        )
    }

    /// The kebab-case wire name, as used in signing-policy rules.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performed => "performed",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::ReleaseApproval => "release-approval",
            Self::Rejection => "rejection",
            Self::DeviationClosure => "deviation-closure",
        }
    }
}

impl std::fmt::Display for SigningMeaning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issued electronic signature. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectronicSignature {
    pub signature_id: SignatureId,
    /// The record this signature applies to (batch id or deviation id).
    pub record_id: String,
    pub signer: Actor,
    pub meaning: SigningMeaning,
    /// Justification given at signing time. May be empty for meanings that
    /// do not require one.
    pub reason: String,
    pub signed_at: DateTime<Utc>,
    /// SHA-256 hex of the exact record content that was signed.
    pub content_hash: String,
    /// Hex-encoded Ed25519 signature over the canonical signing digest.
    pub signature_value: String,
}

/// A request to issue an electronic signature.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    pub record_id: String,
    /// The content hash the caller believes is current. Signing fails if the
    /// record has moved on — stale content is never signed.
    pub content_hash: String,
    pub signer: Actor,
    pub meaning: SigningMeaning,
    pub reason: String,
    /// Re-entered credential token. Identity is verified upstream; Part 11
    /// still requires credential re-entry at the moment of signing, so an
    /// empty token is rejected.
    pub credential: String,
}
