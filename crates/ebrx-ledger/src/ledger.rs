//! The append-only audit ledger.
//!
//! `AuditLedger` keeps all committed events in a `Vec` behind a single
//! `Mutex`. That mutex is the one serialization point for the whole
//! compliance core: hash computation happens inside the critical section, so
//! the chain has exactly one valid successor at any moment, and sequence
//! numbers come out gapless no matter how many threads append.
//!
//! There is no update or delete anywhere on the public surface — the
//! append-only property is enforced by interface design, not convention.
//!
//! When verification finds a mismatch the ledger takes a write hold: every
//! further append is refused with the stored `Integrity` error until
//! `clear_integrity_hold` is called, and the clearance itself is appended as
//! a CRITICAL event. Silently continuing would extend a compromised chain.

use std::sync::Mutex;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use ebrx_contracts::{
    actor::Actor,
    audit::{ActionKind, EntityType, EventDraft, Severity, Snapshot},
    error::{ComplianceError, ComplianceResult},
    report::TimeRange,
};

use crate::{
    chain::{hash_event, verify_chain},
    event::AuditEvent,
};

/// Ledger construction parameters.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long committed events must remain retrievable. Part 11 practice
    /// is a decade or more.
    pub retention_years: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { retention_years: 10 }
    }
}

/// Committed-event query parameters. All filters are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    /// Closed time range over server-assigned timestamps.
    pub range: Option<TimeRange>,
    /// Cap on the number of returned events, applied after the other
    /// filters, preserving sequence order.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(entity_type) = self.entity_type {
            if event.entity_type != entity_type {
                return false;
            }
        }
        if let Some(entity_id) = &self.entity_id {
            if &event.entity_id != entity_id {
                return false;
            }
        }
        if let Some(range) = &self.range {
            if !range.contains(event.timestamp) {
                return false;
            }
        }
        true
    }
}

// ── Internal mutable state ────────────────────────────────────────────────────

/// An active refusal to accept writes, set when verification failed.
#[derive(Debug, Clone)]
pub(crate) struct WriteHold {
    pub(crate) sequence: u64,
    pub(crate) detail: String,
}

/// The mutable interior of an `AuditLedger`.
pub(crate) struct LedgerState {
    /// All committed events in append order. Index == sequence.
    pub(crate) events: Vec<AuditEvent>,

    /// The next sequence number to assign (starts at 0).
    pub(crate) next_sequence: u64,

    /// The `this_hash` of the last committed event, or `GENESIS_HASH` before
    /// any event has been committed.
    pub(crate) last_hash: String,

    /// Present while the ledger refuses appends after an integrity failure.
    pub(crate) write_hold: Option<WriteHold>,
}

// ── Public ledger ─────────────────────────────────────────────────────────────

/// The append-only, SHA-256 hash-chained audit ledger.
///
/// # Thread safety
///
/// All operations acquire the internal mutex. Share the ledger across
/// components behind an `Arc`.
pub struct AuditLedger {
    config: LedgerConfig,
    pub(crate) state: Mutex<LedgerState>,
}

impl AuditLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LedgerState {
                events: Vec::new(),
                next_sequence: 0,
                last_hash: AuditEvent::GENESIS_HASH.to_string(),
                write_hold: None,
            }),
        }
    }

    /// Validate and commit one event draft.
    ///
    /// Assigns the timestamp, retention horizon, and next sequence number,
    /// computes the chained hash, and commits — all inside one critical
    /// section, so the commit is atomic: either the event is stored with a
    /// unique sequence number or nothing is stored.
    ///
    /// # Errors
    ///
    /// `Validation` when the draft is not attributable, lacks a required
    /// reason, or carries a snapshot that disagrees with its entity type.
    /// `Integrity` while a write hold is active.
    pub fn append(&self, draft: EventDraft) -> ComplianceResult<AuditEvent> {
        Self::validate_draft(&draft)?;

        let mut state = self.state.lock().expect("ledger state lock poisoned");
        if let Some(hold) = &state.write_hold {
            warn!(
                sequence = hold.sequence,
                entity_id = %draft.entity_id,
                "append refused: integrity hold active"
            );
            return Err(ComplianceError::Integrity {
                sequence: hold.sequence,
                detail: hold.detail.clone(),
            });
        }

        let event = self.commit_locked(&mut state, draft);

        debug!(
            sequence = event.sequence,
            action = %event.action,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            "audit event committed"
        );

        Ok(event)
    }

    /// Pure snapshot read over committed state, in sequence order.
    ///
    /// For a closed time range the result is complete and never reordered:
    /// a reader that can see sequence `n` can also see every lower sequence.
    pub fn query(&self, filter: &EventFilter) -> Vec<AuditEvent> {
        let state = self.state.lock().expect("ledger state lock poisoned");
        let mut out: Vec<AuditEvent> = state
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    /// The complete ordered trail for one entity.
    pub fn entity_trail(&self, entity_type: EntityType, entity_id: &str) -> Vec<AuditEvent> {
        self.query(&EventFilter::for_entity(entity_type, entity_id))
    }

    /// Verify the whole chain. See [`AuditLedger::verify_range`].
    pub fn verify(&self) -> ComplianceResult<()> {
        self.verify_range(0, u64::MAX)
    }

    /// Recompute every hash in the inclusive sequence range and check
    /// linkage, reporting the first index where recomputed ≠ stored.
    ///
    /// This is the tamper-evidence contract. On a mismatch the ledger takes
    /// a write hold: appends fail with the same `Integrity` error until the
    /// hold is explicitly cleared.
    pub fn verify_range(&self, start: u64, end: u64) -> ComplianceResult<()> {
        let mut state = self.state.lock().expect("ledger state lock poisoned");

        let len = state.events.len() as u64;
        if len == 0 || start >= len || end < start {
            return Ok(());
        }
        let end = end.min(len - 1);

        let expected_prev = if start == 0 {
            AuditEvent::GENESIS_HASH.to_string()
        } else {
            state.events[(start - 1) as usize].this_hash.clone()
        };

        let segment = &state.events[start as usize..=end as usize];
        match verify_chain(segment, &expected_prev, start) {
            Ok(()) => Ok(()),
            Err(violation) => {
                let sequence = violation.sequence();
                let detail = violation.describe();
                warn!(sequence, %detail, "audit chain verification failed; ledger is now read-only for writes");
                if state.write_hold.is_none() {
                    state.write_hold = Some(WriteHold {
                        sequence,
                        detail: detail.clone(),
                    });
                }
                Err(ComplianceError::Integrity { sequence, detail })
            }
        }
    }

    /// Lift an active write hold after administrative review.
    ///
    /// The clearance is itself committed as a CRITICAL `ledger` event, so
    /// the decision to resume writing is on the record. Fails with
    /// `Validation` when no hold is active.
    pub fn clear_integrity_hold(
        &self,
        actor: &Actor,
        reason: &str,
    ) -> ComplianceResult<AuditEvent> {
        if reason.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "clearing an integrity hold requires a non-empty reason".to_string(),
            });
        }

        let mut state = self.state.lock().expect("ledger state lock poisoned");
        let hold = state.write_hold.take().ok_or_else(|| ComplianceError::Validation {
            reason: "no integrity hold is active on this ledger".to_string(),
        })?;

        let draft = EventDraft {
            actor: actor.clone(),
            action: ActionKind::Update,
            entity_type: EntityType::Ledger,
            entity_id: "ledger".to_string(),
            old_value: Some(Snapshot::Ledger {
                writes_suspended: true,
            }),
            new_value: Some(Snapshot::Ledger {
                writes_suspended: false,
            }),
            reason: Some(format!(
                "integrity hold cleared after review of sequence {}: {reason}",
                hold.sequence
            )),
            severity: Severity::Critical,
        };
        let event = self.commit_locked(&mut state, draft);

        info!(
            held_at_sequence = hold.sequence,
            cleared_by = %actor.user_id,
            clearance_sequence = event.sequence,
            "integrity hold cleared"
        );

        Ok(event)
    }

    /// The `this_hash` of the last committed event — a compact commitment to
    /// the entire ledger. Returns the genesis sentinel when empty.
    pub fn head_hash(&self) -> String {
        let state = self.state.lock().expect("ledger state lock poisoned");
        state.last_hash.clone()
    }

    /// Number of committed events.
    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("ledger state lock poisoned");
        state.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The active write hold, if any, as (first bad sequence, detail).
    pub fn write_hold(&self) -> Option<(u64, String)> {
        let state = self.state.lock().expect("ledger state lock poisoned");
        state
            .write_hold
            .as_ref()
            .map(|h| (h.sequence, h.detail.clone()))
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Build, hash, and store one event while the state lock is held.
    ///
    /// Caller is responsible for draft validation and hold checking.
    fn commit_locked(&self, state: &mut LedgerState, draft: EventDraft) -> AuditEvent {
        let timestamp = Utc::now();
        let retention_until = timestamp + Duration::days(365 * self.config.retention_years);

        let mut event = AuditEvent {
            sequence: state.next_sequence,
            timestamp,
            actor: draft.actor,
            action: draft.action,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            old_value: draft.old_value,
            new_value: draft.new_value,
            reason: draft.reason,
            severity: draft.severity,
            retention_until,
            prev_hash: state.last_hash.clone(),
            this_hash: String::new(),
        };
        event.this_hash = hash_event(&event);

        state.events.push(event.clone());
        state.next_sequence += 1;
        state.last_hash = event.this_hash.clone();

        event
    }

    fn validate_draft(draft: &EventDraft) -> ComplianceResult<()> {
        if draft.actor.user_id.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "audit event must be attributable: actor user_id is empty".to_string(),
            });
        }

        if draft.entity_id.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "audit event entity_id is empty".to_string(),
            });
        }

        if draft.action.requires_reason()
            && draft.reason.as_deref().is_none_or(|r| r.trim().is_empty())
        {
            return Err(ComplianceError::Validation {
                reason: format!("action {} requires a non-empty reason", draft.action),
            });
        }

        for (label, snapshot) in [("old_value", &draft.old_value), ("new_value", &draft.new_value)]
        {
            if let Some(snapshot) = snapshot {
                if snapshot.entity_type() != draft.entity_type {
                    return Err(ComplianceError::Validation {
                        reason: format!(
                            "{label} is a {} snapshot but the event targets a {}",
                            snapshot.entity_type(),
                            draft.entity_type
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}
