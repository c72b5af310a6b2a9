//! Batch record types and the lifecycle state enumeration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    deviation::DeviationId,
    signature::{ElectronicSignature, SignatureId},
};

/// Lifecycle state of a batch record.
///
/// Serialized with the display names used on batch paperwork
/// ("QC Review", not "qc_review").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    Draft,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "QC Review")]
    QcReview,
    #[serde(rename = "QA Review")]
    QaReview,
    Released,
    Rejected,
}

impl BatchState {
    /// `Released` and `Rejected` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Rejected)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "Draft",
            Self::InProgress => "In Progress",
            Self::QcReview => "QC Review",
            Self::QaReview => "QA Review",
            Self::Released => "Released",
            Self::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

/// Product family being manufactured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    #[serde(rename = "Monoclonal Antibody")]
    MonoclonalAntibody,
    Vaccine,
    Insulin,
    Biosimilar,
    #[serde(rename = "Cell Therapy")]
    CellTherapy,
}

/// One manufacturing process step inside a batch record.
///
/// Steps are defined when the batch starts and completed one by one as
/// manufacturing proceeds. Completion is recorded through the state machine
/// so each completion lands in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub step_number: u32,
    pub step_name: String,
    /// Governing SOP (e.g. "SOP-INOC-001-v3").
    pub sop_reference: String,
    /// Mandatory steps gate the In Progress → QC Review transition.
    pub mandatory: bool,
    pub performed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The "performed" signature for this step, when one was applied.
    pub signature_id: Option<SignatureId>,
}

impl ProcessStep {
    /// A not-yet-performed step.
    pub fn new(
        step_number: u32,
        step_name: impl Into<String>,
        sop_reference: impl Into<String>,
        mandatory: bool,
    ) -> Self {
        Self {
            step_number,
            step_name: step_name.into(),
            sop_reference: sop_reference.into(),
            mandatory,
            performed_by: None,
            completed_at: None,
            signature_id: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Everything needed to open a new batch record.
#[derive(Debug, Clone)]
pub struct BatchDraft {
    pub batch_id: String,
    pub product: ProductType,
    pub product_name: String,
    /// Target yield in kilograms.
    pub target_yield: f64,
    /// The step plan for this batch, in execution order. The first step is
    /// the inoculation/start step whose completion permits Draft → In
    /// Progress.
    pub steps: Vec<ProcessStep>,
}

/// The electronic batch record.
///
/// Mutable only through state-machine-validated operations; superseded
/// states remain reconstructable from the audit trail. `version` is the
/// optimistic-concurrency token: every accepted mutation increments it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub product: ProductType,
    pub product_name: String,
    pub state: BatchState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub target_yield: f64,
    pub actual_yield: Option<f64>,
    pub steps: Vec<ProcessStep>,
    pub deviation_ids: Vec<DeviationId>,
    pub version: u64,
}

impl BatchRecord {
    pub fn step(&self, step_number: u32) -> Option<&ProcessStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    /// The inoculation/start step is the lowest-numbered step in the plan.
    pub fn start_step_recorded(&self) -> bool {
        self.steps
            .iter()
            .min_by_key(|s| s.step_number)
            .is_some_and(ProcessStep::is_complete)
    }

    pub fn mandatory_steps_complete(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.mandatory)
            .all(ProcessStep::is_complete)
    }
}

/// Caller-supplied evidence accompanying a transition attempt.
///
/// Only things the state machine can independently verify: a signature (which
/// it re-verifies against the record's current content) and a written
/// reason. Everything else — step completion, deviation status — is read
/// from the machine's own state, never trusted from the caller.
#[derive(Debug, Clone, Default)]
pub struct TransitionEvidence {
    pub signature: Option<ElectronicSignature>,
    pub reason: Option<String>,
}

impl TransitionEvidence {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn signed(signature: ElectronicSignature) -> Self {
        Self {
            signature: Some(signature),
            reason: None,
        }
    }

    pub fn signed_with_reason(
        signature: ElectronicSignature,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            signature: Some(signature),
            reason: Some(reason.into()),
        }
    }
}
