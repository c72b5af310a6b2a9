//! Deviation and CAPA types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::SignatureId;

/// Unique identifier for a logged deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviationId(pub uuid::Uuid);

impl DeviationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for DeviationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Classification of a process deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviationSeverity {
    Minor,
    Major,
}

impl std::fmt::Display for DeviationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minor => f.write_str("Minor"),
            Self::Major => f.write_str("Major"),
        }
    }
}

/// Where a deviation sits in its investigation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationStatus {
    Open,
    UnderInvestigation,
    Closed,
}

/// Investigation findings attached to a deviation before closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    /// Root-cause findings in free text.
    pub findings: String,
    /// Reference to the corrective/preventive action plan (e.g. "CAPA-2024-017").
    pub capa_ref: String,
    pub investigated_by: String,
    pub investigated_at: DateTime<Utc>,
}

/// A recorded process deviation linked to a batch.
///
/// Never deleted. A `Major` deviation cannot be closed without an attached
/// investigation and a verified closing signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub deviation_id: DeviationId,
    pub batch_id: String,
    pub description: String,
    pub severity: DeviationSeverity,
    /// Set when the severity demands a documented investigation before
    /// closure (always true for Major).
    pub investigation_required: bool,
    pub status: DeviationStatus,
    pub investigation: Option<Investigation>,
    pub closing_signature_id: Option<SignatureId>,
    pub opened_by: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Deviation {
    /// Open means anything other than `Closed` — an under-investigation
    /// deviation still blocks batch release.
    pub fn is_open(&self) -> bool {
        self.status != DeviationStatus::Closed
    }
}
