//! Compliance report types.
//!
//! A `ComplianceReport` is derived, read-only, and never persisted as
//! authoritative state. It deliberately carries no generation timestamp and
//! keeps its aggregates in ordered maps, so generating it twice over the
//! same window with no new events yields identical output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{audit::EntityType, batch::BatchState, signature::SigningMeaning};

/// A closed time window `[start, end]` over server-assigned timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Closed-range membership: both endpoints included.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// ALCOA+ checklist computed per batch from ledger facts.
///
/// Each flag is derived, never asserted: a failing flag names the offending
/// finding in `issues`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlcoaChecklist {
    /// Every mutating event names a non-empty actor.
    pub attributable: bool,
    /// Every event deserializes to the fixed record shape.
    pub legible: bool,
    /// Timestamps move forward with the sequence, within the configured skew.
    pub contemporaneous: bool,
    /// The hash chain over the trail verifies — records are the originals.
    pub original: bool,
    /// Reasons are present wherever the taxonomy demands them.
    pub accurate: bool,
    /// The trail contains the record's CREATE event.
    pub complete: bool,
    /// Sequence numbers and timestamps are chronologically sound.
    pub consistent: bool,
    /// Every event's retention horizon extends past the report window.
    pub enduring: bool,
    /// The trail is non-empty and queryable.
    pub available: bool,
    /// Human-readable findings for every failed flag.
    pub issues: Vec<String>,
}

impl AlcoaChecklist {
    pub fn compliant(&self) -> bool {
        self.attributable
            && self.legible
            && self.contemporaneous
            && self.original
            && self.accurate
            && self.complete
            && self.consistent
            && self.enduring
            && self.available
    }
}

/// A CRITICAL-severity finding surfaced in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalFinding {
    /// Ledger sequence number: the stored event's sequence, or the first bad
    /// sequence for an integrity violation detected during generation.
    pub sequence: u64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub detail: String,
}

/// Per-batch lifecycle summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReportEntry {
    pub batch_id: String,
    pub state: BatchState,
    /// Wall-clock seconds from batch start to terminal disposition, once
    /// the batch is terminal.
    pub lifecycle_seconds: Option<i64>,
    pub open_deviations: usize,
    pub alcoa: AlcoaChecklist,
}

/// The Part 11 / ALCOA+ compliance report for one time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub range: TimeRange,
    /// Events committed inside the window.
    pub total_events: usize,
    /// Signatures issued inside the window, counted by declared meaning.
    pub signature_counts: BTreeMap<SigningMeaning, u64>,
    /// Blocked transition attempts recorded for forensic visibility.
    pub rejected_transition_attempts: u64,
    /// Every CRITICAL event in the window plus any chain-integrity
    /// violation found while generating the report.
    pub critical_findings: Vec<CriticalFinding>,
    /// Whether the full audit chain verified during generation.
    pub ledger_intact: bool,
    /// Per-batch entries, ordered by batch id.
    pub batches: Vec<BatchReportEntry>,
}
