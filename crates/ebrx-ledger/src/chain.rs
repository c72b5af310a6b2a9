//! Hash-chain primitives: event hashing, record content hashing, and chain
//! integrity verification.
//!
//! Every field that contributes to an event's hash is listed explicitly so
//! nothing is accidentally omitted.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. canonical JSON of (timestamp, actor, action, entity_type, entity_id,
//!      old_value, new_value, reason, severity, retention_until)
//!
//! serde_json's default map representation keeps object keys sorted, and the
//! tuple serializer emits fields in the order written here, so the canonical
//! form is deterministic across processes.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::event::AuditEvent;

/// Compute the SHA-256 hash for a single audit event.
///
/// The hash commits to every field of the event except `this_hash` itself:
/// its position in the chain (`sequence`), its link to the previous event
/// (`prev_hash`), and the full canonicalized payload.
///
/// Returns a lowercase 64-character hex string.
///
/// # Panics
///
/// Panics if the event cannot be serialized to JSON — which cannot happen
/// for the well-formed `AuditEvent` type.
pub fn hash_event(event: &AuditEvent) -> String {
    let payload = serde_json::to_vec(&(
        &event.timestamp,
        &event.actor,
        &event.action,
        &event.entity_type,
        &event.entity_id,
        &event.old_value,
        &event.new_value,
        &event.reason,
        &event.severity,
        &event.retention_until,
    ))
    .expect("AuditEvent fields must always be serializable to JSON");

    let mut hasher = Sha256::new();
    hasher.update(event.sequence.to_le_bytes());
    hasher.update(event.prev_hash.as_bytes());
    hasher.update(&payload);

    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonical JSON serialization of any record content.
///
/// This is the hash electronic signatures bind to: sign a record at hash H,
/// mutate the record, and the recomputed hash no longer equals H.
///
/// # Panics
///
/// Panics if `content` fails to serialize — the record types used with this
/// function always serialize.
pub fn content_hash<T: Serialize>(content: &T) -> String {
    let canonical =
        serde_json::to_vec(content).expect("record content must always be serializable to JSON");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// The first defect found while verifying a chain segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    /// The event's `prev_hash` does not match its predecessor's `this_hash`
    /// (or the genesis sentinel for sequence 0).
    Linkage { sequence: u64 },
    /// The event's stored `this_hash` does not match the hash recomputed
    /// from its own fields — the stored bytes were altered.
    Recomputation { sequence: u64 },
    /// Sequence numbers are not gapless from the expected start.
    Sequencing { sequence: u64, expected: u64 },
}

impl ChainViolation {
    /// The sequence number at which verification first failed.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Linkage { sequence }
            | Self::Recomputation { sequence }
            | Self::Sequencing { sequence, .. } => *sequence,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Linkage { sequence } => format!(
                "event {sequence} does not link to its predecessor's hash"
            ),
            Self::Recomputation { sequence } => format!(
                "stored hash of event {sequence} does not match its recomputed hash"
            ),
            Self::Sequencing { sequence, expected } => format!(
                "event carries sequence {sequence} where {expected} was expected"
            ),
        }
    }
}

/// Verify the integrity of a contiguous chain segment.
///
/// `expected_prev` is the hash the first event must link to: the genesis
/// sentinel when verifying from the start, or the `this_hash` of the event
/// preceding the segment otherwise. `expected_start` is the sequence number
/// the segment must begin at.
///
/// Three rules, checked per event in order:
///
/// 1. **Sequencing** — sequence numbers run gapless from `expected_start`.
/// 2. **Prev-hash linkage** — each event's `prev_hash` equals the
///    `this_hash` of the preceding event.
/// 3. **Hash correctness** — each event's `this_hash` matches the value
///    recomputed from its own fields.
///
/// Returns the first violation found. An empty segment is defined as valid.
pub fn verify_chain(
    events: &[AuditEvent],
    expected_prev: &str,
    expected_start: u64,
) -> Result<(), ChainViolation> {
    let mut expected_prev = expected_prev.to_string();
    let mut expected_seq = expected_start;

    for event in events {
        if event.sequence != expected_seq {
            return Err(ChainViolation::Sequencing {
                sequence: event.sequence,
                expected: expected_seq,
            });
        }

        if event.prev_hash != expected_prev {
            return Err(ChainViolation::Linkage {
                sequence: event.sequence,
            });
        }

        let recomputed = hash_event(event);
        if event.this_hash != recomputed {
            return Err(ChainViolation::Recomputation {
                sequence: event.sequence,
            });
        }

        expected_prev = event.this_hash.clone();
        expected_seq += 1;
    }

    Ok(())
}
