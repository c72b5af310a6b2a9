//! The fixed batch lifecycle transition table.
//!
//! Draft → In Progress → QC Review → QA Review → {Released | Rejected}.
//! Released and Rejected are terminal. Anything not listed here is rejected
//! before evidence is even looked at.

use ebrx_contracts::batch::BatchState;

/// Whether `from → to` appears in the lifecycle table.
///
/// This is table membership only — evidence preconditions are checked
/// separately by the state machine.
pub fn transition_allowed(from: BatchState, to: BatchState) -> bool {
    use BatchState::*;
    matches!(
        (from, to),
        (Draft, InProgress)
            | (InProgress, QcReview)
            | (QcReview, QaReview)
            | (QaReview, Released)
            | (QaReview, Rejected)
    )
}
