//! The committed audit event type.
//!
//! `AuditEvent` is a single entry in the hash chain: a validated draft plus
//! the server-assigned sequence number, timestamp, retention horizon, and
//! the SHA-256 hashes that make tampering detectable. Events are created
//! once by the ledger on append and never mutated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ebrx_contracts::{
    actor::Actor,
    audit::{ActionKind, EntityType, Severity, Snapshot},
};

/// A single committed entry in the audit hash chain.
///
/// Each event commits to the previous event via `prev_hash`, forming an
/// append-only chain. Modifying any field — including the snapshots —
/// invalidates `this_hash` and every subsequent `prev_hash`, which
/// `verify_chain` detects at exactly the first modified index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonically increasing, gapless position in the chain, from 0.
    pub sequence: u64,

    /// Server wall clock at the moment of append (UTC). Never supplied by
    /// the caller.
    pub timestamp: DateTime<Utc>,

    pub actor: Actor,
    pub action: ActionKind,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub old_value: Option<Snapshot>,
    pub new_value: Option<Snapshot>,
    pub reason: Option<String>,
    pub severity: Severity,

    /// Regulatory retention horizon assigned from the ledger configuration.
    pub retention_until: DateTime<Utc>,

    /// SHA-256 hash (hex) of the previous event, or `GENESIS_HASH` for the
    /// first event.
    pub prev_hash: String,

    /// SHA-256 hash (hex) of this event's canonical content.
    ///
    /// Computed by `chain::hash_event()` over (sequence, prev_hash,
    /// canonical JSON of the remaining fields).
    pub this_hash: String,
}

impl AuditEvent {
    /// The sentinel `prev_hash` used for the first event in every chain.
    ///
    /// 64 hex zeros — a value that can never be the SHA-256 of real data,
    /// making genesis detection unambiguous.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}
