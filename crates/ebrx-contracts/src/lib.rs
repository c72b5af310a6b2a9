//! # ebrx-contracts
//!
//! Shared types, taxonomies, and error contracts for the EBRX compliance
//! core.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate — only data definitions and the error taxonomy.

pub mod actor;
pub mod audit;
pub mod batch;
pub mod deviation;
pub mod error;
pub mod report;
pub mod signature;

#[cfg(test)]
mod tests {
    use super::*;
    use audit::{ActionKind, EntityType, Severity, Snapshot};
    use batch::{BatchState, ProcessStep};
    use deviation::{DeviationSeverity, DeviationStatus};
    use error::ComplianceError;
    use signature::{SignatureId, SigningMeaning};

    // ── Taxonomy wire names ──────────────────────────────────────────────────

    #[test]
    fn action_kind_uses_regulatory_wire_names() {
        let json = serde_json::to_string(&ActionKind::ElectronicSignature).unwrap();
        assert_eq!(json, "\"ELECTRONIC_SIGNATURE\"");

        let decoded: ActionKind = serde_json::from_str("\"APPROVE\"").unwrap();
        assert_eq!(decoded, ActionKind::Approve);
    }

    #[test]
    fn severity_round_trips_uppercase() {
        for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
            let json = serde_json::to_string(&severity).unwrap();
            let decoded: Severity = serde_json::from_str(&json).unwrap();
            assert_eq!(severity, decoded);
        }
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn batch_state_serializes_with_paperwork_names() {
        assert_eq!(
            serde_json::to_string(&BatchState::QcReview).unwrap(),
            "\"QC Review\""
        );
        let decoded: BatchState = serde_json::from_str("\"In Progress\"").unwrap();
        assert_eq!(decoded, BatchState::InProgress);
    }

    #[test]
    fn terminal_states() {
        assert!(BatchState::Released.is_terminal());
        assert!(BatchState::Rejected.is_terminal());
        assert!(!BatchState::QaReview.is_terminal());
        assert!(!BatchState::Draft.is_terminal());
    }

    // ── Reason requirements ──────────────────────────────────────────────────

    #[test]
    fn actions_requiring_reason() {
        assert!(ActionKind::Update.requires_reason());
        assert!(ActionKind::Approve.requires_reason());
        assert!(ActionKind::Reject.requires_reason());
        assert!(!ActionKind::Create.requires_reason());
        assert!(!ActionKind::Read.requires_reason());
        assert!(!ActionKind::ElectronicSignature.requires_reason());
    }

    #[test]
    fn meanings_requiring_reason() {
        assert!(SigningMeaning::ReleaseApproval.requires_reason());
        assert!(SigningMeaning::Rejection.requires_reason());
        assert!(SigningMeaning::DeviationClosure.requires_reason());
        assert!(!SigningMeaning::Performed.requires_reason());
        assert!(!SigningMeaning::Reviewed.requires_reason());
    }

    // ── Snapshot / entity-type agreement ─────────────────────────────────────

    #[test]
    fn snapshot_reports_its_entity_type() {
        let snap = Snapshot::Batch {
            state: BatchState::Draft,
            version: 0,
        };
        assert_eq!(snap.entity_type(), EntityType::Batch);

        let snap = Snapshot::Deviation {
            severity: DeviationSeverity::Major,
            status: DeviationStatus::Open,
        };
        assert_eq!(snap.entity_type(), EntityType::Deviation);

        let snap = Snapshot::Signature {
            signature_id: SignatureId::new(),
            meaning: SigningMeaning::Reviewed,
            record_id: "B2024-001".to_string(),
        };
        assert_eq!(snap.entity_type(), EntityType::Signature);
    }

    #[test]
    fn snapshot_round_trips_tagged() {
        let snap = Snapshot::ProcessStep {
            step_number: 3,
            step_name: "Inoculation".to_string(),
            completed: true,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"entity\":\"process_step\""), "tag missing: {json}");
        let decoded: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, decoded);
    }

    // ── Batch record helpers ─────────────────────────────────────────────────

    #[test]
    fn start_step_is_lowest_numbered() {
        let mut steps = vec![
            ProcessStep::new(2, "Cell Culture", "SOP-CULTURE-001-v7", true),
            ProcessStep::new(1, "Inoculation", "SOP-INOC-001-v3", true),
        ];
        let record = batch::BatchRecord {
            batch_id: "B-100".to_string(),
            product: batch::ProductType::MonoclonalAntibody,
            product_name: "mAb-A".to_string(),
            state: BatchState::Draft,
            started_at: chrono::Utc::now(),
            completed_at: None,
            target_yield: 50.0,
            actual_yield: None,
            steps: steps.clone(),
            deviation_ids: vec![],
            version: 0,
        };
        assert!(!record.start_step_recorded());

        // Completing step 2 is not enough — step 1 is the start step.
        steps[0].completed_at = Some(chrono::Utc::now());
        let record = batch::BatchRecord { steps: steps.clone(), ..record };
        assert!(!record.start_step_recorded());

        steps[1].completed_at = Some(chrono::Utc::now());
        let record = batch::BatchRecord { steps, ..record };
        assert!(record.start_step_recorded());
    }

    // ── Error display messages ───────────────────────────────────────────────

    #[test]
    fn error_conflict_display() {
        let err = ComplianceError::Conflict {
            record_id: "B-100".to_string(),
            expected: 3,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("B-100"));
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 4"));
    }

    #[test]
    fn error_authorization_display() {
        let err = ComplianceError::Authorization {
            actor: "USR-014".to_string(),
            role: "manufacturing-operator".to_string(),
            action: "sign with meaning 'release-approval'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("USR-014"));
        assert!(msg.contains("manufacturing-operator"));
        assert!(msg.contains("release-approval"));
    }

    #[test]
    fn error_integrity_display() {
        let err = ComplianceError::Integrity {
            sequence: 17,
            detail: "stored hash does not match recomputed hash".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sequence 17"));
        assert!(msg.contains("recomputed"));
    }

    #[test]
    fn error_not_found_display() {
        let err = ComplianceError::NotFound {
            entity_kind: "batch".to_string(),
            entity_id: "B-404".to_string(),
        };
        assert_eq!(err.to_string(), "batch 'B-404' not found");
    }
}
