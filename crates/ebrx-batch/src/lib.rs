//! # ebrx-batch
//!
//! Batch record lifecycle state machine for the EBRX compliance core.
//!
//! Transitions follow a fixed table (Draft → In Progress → QC Review → QA
//! Review → Released/Rejected), every accepted transition is audited before
//! the record mutates, and optimistic concurrency via the record's version
//! counter keeps precondition checks out of any long-held lock.

pub mod machine;
pub mod table;

pub use machine::BatchStateMachine;
pub use table::transition_allowed;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ebrx_contracts::{
        actor::{Actor, Role},
        audit::{ActionKind, EntityType, Severity},
        batch::{BatchDraft, BatchState, ProcessStep, ProductType, TransitionEvidence},
        deviation::DeviationSeverity,
        error::ComplianceError,
        signature::{ElectronicSignature, SignatureRequest, SigningMeaning},
    };
    use ebrx_deviation::DeviationManager;
    use ebrx_esign::{SignatureService, SigningKeypair, TomlSigningPolicy};
    use ebrx_ledger::{content_hash, AuditLedger, EventFilter, LedgerConfig};

    use super::BatchStateMachine;

    const TEST_POLICY: &str = r#"
        [[rules]]
        id = "operators-perform"
        description = "Operators sign the steps they perform"
        role = "manufacturing-operator"
        meaning = "performed"
        permit = true

        [[rules]]
        id = "qc-review"
        description = "QC analysts sign reviews"
        role = "qc-analyst"
        meaning = "reviewed"
        permit = true

        [[rules]]
        id = "qa-dispositions"
        description = "QA managers hold release, rejection, and closure capabilities"
        role = "qa-manager"
        meaning = "*"
        permit = true
    "#;

    fn operator() -> Actor {
        Actor::new("USR-001", "Jo Operator", Role::new("manufacturing-operator"))
    }

    fn qc() -> Actor {
        Actor::new("USR-500", "Sam QC", Role::new("qc-analyst"))
    }

    fn qa() -> Actor {
        Actor::new("USR-900", "Alex QA", Role::new("qa-manager"))
    }

    struct Env {
        ledger: Arc<AuditLedger>,
        signatures: Arc<SignatureService>,
        deviations: Arc<DeviationManager>,
        machine: BatchStateMachine,
    }

    fn env() -> Env {
        let ledger = Arc::new(AuditLedger::new(LedgerConfig::default()));
        let signatures = Arc::new(SignatureService::new(
            Arc::clone(&ledger),
            Box::new(TomlSigningPolicy::from_toml_str(TEST_POLICY).unwrap()),
            SigningKeypair::generate(),
        ));
        let deviations = Arc::new(DeviationManager::new(
            Arc::clone(&ledger),
            Arc::clone(&signatures),
        ));
        let machine = BatchStateMachine::new(
            Arc::clone(&ledger),
            Arc::clone(&signatures),
            Arc::clone(&deviations),
        );
        Env {
            ledger,
            signatures,
            deviations,
            machine,
        }
    }

    fn draft(batch_id: &str) -> BatchDraft {
        BatchDraft {
            batch_id: batch_id.to_string(),
            product: ProductType::MonoclonalAntibody,
            product_name: "mAb-A".to_string(),
            target_yield: 50.0,
            steps: vec![
                ProcessStep::new(1, "Inoculation", "SOP-INOC-001-v3", true),
                ProcessStep::new(2, "Cell Culture", "SOP-CULTURE-001-v7", true),
                ProcessStep::new(3, "Harvest Sampling", "SOP-HARV-002-v1", false),
            ],
        }
    }

    /// Sign the batch record's current content.
    fn sign_batch(
        env: &Env,
        batch_id: &str,
        signer: Actor,
        meaning: SigningMeaning,
        reason: &str,
    ) -> ElectronicSignature {
        let record = env.machine.get(batch_id).unwrap();
        env.signatures
            .sign(
                SignatureRequest {
                    record_id: batch_id.to_string(),
                    content_hash: content_hash(&record),
                    signer,
                    meaning,
                    reason: reason.to_string(),
                    credential: "otp-112233".to_string(),
                },
                &record,
            )
            .unwrap()
    }

    /// Record one step with a fresh 'performed' signature.
    fn perform_step(env: &Env, batch_id: &str, step_number: u32) {
        let signature = sign_batch(env, batch_id, operator(), SigningMeaning::Performed, "");
        env.machine
            .record_step(batch_id, step_number, &operator(), Some(&signature))
            .unwrap();
    }

    /// Drive a fresh batch to QC Review.
    fn to_qc_review(env: &Env, batch_id: &str) -> u64 {
        env.machine.start_batch(draft(batch_id), &operator()).unwrap();
        perform_step(env, batch_id, 1);
        let record = env.machine.get(batch_id).unwrap();
        let record = env
            .machine
            .transition(
                batch_id,
                BatchState::InProgress,
                record.version,
                &TransitionEvidence::none(),
                &operator(),
            )
            .unwrap();
        perform_step(env, batch_id, 2);
        let version = record.version + 1; // step recording bumped it
        let record = env
            .machine
            .transition(
                batch_id,
                BatchState::QcReview,
                version,
                &TransitionEvidence::none(),
                &operator(),
            )
            .unwrap();
        record.version
    }

    /// Drive a batch on to QA Review.
    fn to_qa_review(env: &Env, batch_id: &str) -> u64 {
        let version = to_qc_review(env, batch_id);
        let qc_signature = sign_batch(env, batch_id, qc(), SigningMeaning::Reviewed, "");
        let record = env
            .machine
            .transition(
                batch_id,
                BatchState::QaReview,
                version,
                &TransitionEvidence::signed(qc_signature),
                &qc(),
            )
            .unwrap();
        record.version
    }

    // ── Creation ──────────────────────────────────────────────────────────────

    #[test]
    fn start_batch_opens_draft_at_version_zero() {
        let env = env();
        let record = env.machine.start_batch(draft("B-100"), &operator()).unwrap();

        assert_eq!(record.state, BatchState::Draft);
        assert_eq!(record.version, 0);

        let trail = env.ledger.entity_trail(EntityType::Batch, "B-100");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, ActionKind::Create);

        // Same id cannot be opened twice.
        assert!(matches!(
            env.machine.start_batch(draft("B-100"), &operator()),
            Err(ComplianceError::Validation { .. })
        ));
    }

    // ── Step recording ────────────────────────────────────────────────────────

    #[test]
    fn mandatory_step_requires_performed_signature() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();

        let result = env.machine.record_step("B-100", 1, &operator(), None);
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("performed"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }

        // With a signature it lands, once.
        perform_step(&env, "B-100", 1);
        let record = env.machine.get("B-100").unwrap();
        assert!(record.step(1).unwrap().is_complete());
        assert_eq!(record.version, 1);

        let signature = sign_batch(&env, "B-100", operator(), SigningMeaning::Performed, "");
        let again = env
            .machine
            .record_step("B-100", 1, &operator(), Some(&signature));
        assert!(matches!(again, Err(ComplianceError::Validation { .. })));
    }

    #[test]
    fn optional_step_records_without_signature() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();
        let record = env
            .machine
            .record_step("B-100", 3, &operator(), None)
            .unwrap();
        assert!(record.step(3).unwrap().is_complete());
    }

    // ── Transition gating ─────────────────────────────────────────────────────

    #[test]
    fn draft_to_in_progress_requires_start_step() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();

        let result = env.machine.transition(
            "B-100",
            BatchState::InProgress,
            0,
            &TransitionEvidence::none(),
            &operator(),
        );
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("start step"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
        assert_eq!(env.machine.get("B-100").unwrap().version, 0);
    }

    #[test]
    fn off_table_transition_is_rejected_and_recorded() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();
        let before = env.ledger.len();

        let result = env.machine.transition(
            "B-100",
            BatchState::Released,
            0,
            &TransitionEvidence::none(),
            &operator(),
        );
        assert!(matches!(result, Err(ComplianceError::Validation { .. })));

        let record = env.machine.get("B-100").unwrap();
        assert_eq!(record.state, BatchState::Draft, "record must be unchanged");
        assert_eq!(record.version, 0);

        // One forensic WARNING REJECT event was appended.
        let events = env.ledger.query(&EventFilter::all());
        assert_eq!(events.len(), before + 1);
        let forensic = events.last().unwrap();
        assert_eq!(forensic.action, ActionKind::Reject);
        assert_eq!(forensic.severity, Severity::Warning);
        assert!(forensic
            .reason
            .as_deref()
            .unwrap()
            .contains("not in the lifecycle table"));
    }

    #[test]
    fn every_off_table_target_from_draft_is_rejected() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();

        for target in [
            BatchState::Draft,
            BatchState::QcReview,
            BatchState::QaReview,
            BatchState::Released,
            BatchState::Rejected,
        ] {
            let result = env.machine.transition(
                "B-100",
                target,
                0,
                &TransitionEvidence::none(),
                &operator(),
            );
            assert!(
                matches!(result, Err(ComplianceError::Validation { .. })),
                "transition Draft -> {target} must be rejected"
            );
            assert_eq!(env.machine.get("B-100").unwrap().version, 0);
        }
    }

    #[test]
    fn version_mismatch_is_a_conflict_with_no_side_effects() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();
        perform_step(&env, "B-100", 1);
        let before = env.ledger.len();

        // Stale expected_version (0; step recording moved it to 1).
        let result = env.machine.transition(
            "B-100",
            BatchState::InProgress,
            0,
            &TransitionEvidence::none(),
            &operator(),
        );
        match result {
            Err(ComplianceError::Conflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected Conflict error, got {other:?}"),
        }
        assert_eq!(env.ledger.len(), before, "a conflict leaves no audit event");
        assert_eq!(env.machine.get("B-100").unwrap().state, BatchState::Draft);
    }

    #[test]
    fn qc_review_requires_all_mandatory_steps() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();
        perform_step(&env, "B-100", 1);
        let record = env.machine.get("B-100").unwrap();
        env.machine
            .transition(
                "B-100",
                BatchState::InProgress,
                record.version,
                &TransitionEvidence::none(),
                &operator(),
            )
            .unwrap();

        // Step 2 (mandatory) still open.
        let version = env.machine.get("B-100").unwrap().version;
        let result = env.machine.transition(
            "B-100",
            BatchState::QcReview,
            version,
            &TransitionEvidence::none(),
            &operator(),
        );
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("Cell Culture"), "missing step should be named: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn qa_review_requires_qc_signature_and_no_open_major() {
        let env = env();
        let version = to_qc_review(&env, "B-100");

        // No signature at all.
        let result = env.machine.transition(
            "B-100",
            BatchState::QaReview,
            version,
            &TransitionEvidence::none(),
            &qc(),
        );
        assert!(matches!(result, Err(ComplianceError::Validation { .. })));

        // Open Major deviation blocks even with a valid signature.
        let deviation = env
            .deviations
            .open_deviation("B-100", "Temperature excursion", DeviationSeverity::Major, &operator())
            .unwrap();
        let qc_signature = sign_batch(&env, "B-100", qc(), SigningMeaning::Reviewed, "");
        let result = env.machine.transition(
            "B-100",
            BatchState::QaReview,
            version,
            &TransitionEvidence::signed(qc_signature),
            &qc(),
        );
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("Major"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }

        // Investigate and close the deviation; the gate opens.
        env.deviations
            .attach_investigation(deviation.deviation_id, "HVAC fluctuation", "CAPA-2024-031", &qa())
            .unwrap();
        let current = env.deviations.get(deviation.deviation_id).unwrap();
        let closure = env
            .signatures
            .sign(
                SignatureRequest {
                    record_id: deviation.deviation_id.to_string(),
                    content_hash: content_hash(&current),
                    signer: qa(),
                    meaning: SigningMeaning::DeviationClosure,
                    reason: "no product impact".to_string(),
                    credential: "otp-445566".to_string(),
                },
                &current,
            )
            .unwrap();
        env.deviations
            .close_deviation(deviation.deviation_id, &closure, &qa())
            .unwrap();

        let qc_signature = sign_batch(&env, "B-100", qc(), SigningMeaning::Reviewed, "");
        let record = env
            .machine
            .transition(
                "B-100",
                BatchState::QaReview,
                version,
                &TransitionEvidence::signed(qc_signature),
                &qc(),
            )
            .unwrap();
        assert_eq!(record.state, BatchState::QaReview);
    }

    #[test]
    fn release_blocked_by_open_minor_deviation() {
        let env = env();
        let version = to_qa_review(&env, "B-100");

        let deviation = env
            .deviations
            .open_deviation("B-100", "Minor pH drift", DeviationSeverity::Minor, &operator())
            .unwrap();

        let qa_signature = sign_batch(
            &env,
            "B-100",
            qa(),
            SigningMeaning::ReleaseApproval,
            "all specifications met",
        );
        let result = env.machine.transition(
            "B-100",
            BatchState::Released,
            version,
            &TransitionEvidence::signed(qa_signature),
            &qa(),
        );
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("open deviation"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }

        // Close the Minor deviation (no investigation required), then release.
        let current = env.deviations.get(deviation.deviation_id).unwrap();
        let closure = env
            .signatures
            .sign(
                SignatureRequest {
                    record_id: deviation.deviation_id.to_string(),
                    content_hash: content_hash(&current),
                    signer: qa(),
                    meaning: SigningMeaning::DeviationClosure,
                    reason: "drift within validated range".to_string(),
                    credential: "otp-778899".to_string(),
                },
                &current,
            )
            .unwrap();
        env.deviations
            .close_deviation(deviation.deviation_id, &closure, &qa())
            .unwrap();

        let qa_signature = sign_batch(
            &env,
            "B-100",
            qa(),
            SigningMeaning::ReleaseApproval,
            "all specifications met",
        );
        let record = env
            .machine
            .transition(
                "B-100",
                BatchState::Released,
                version,
                &TransitionEvidence::signed(qa_signature),
                &qa(),
            )
            .unwrap();
        assert_eq!(record.state, BatchState::Released);
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn rejection_requires_signature_and_reason_but_tolerates_open_deviations() {
        let env = env();
        let version = to_qa_review(&env, "B-100");

        env.deviations
            .open_deviation("B-100", "Major contamination alarm", DeviationSeverity::Major, &operator())
            .unwrap();

        // Missing reason is refused.
        let rejection = sign_batch(
            &env,
            "B-100",
            qa(),
            SigningMeaning::Rejection,
            "contamination confirmed in two samples",
        );
        let result = env.machine.transition(
            "B-100",
            BatchState::Rejected,
            version,
            &TransitionEvidence::signed(rejection.clone()),
            &qa(),
        );
        assert!(matches!(result, Err(ComplianceError::Validation { .. })));

        // With a reason it proceeds, open deviation and all.
        let record = env
            .machine
            .transition(
                "B-100",
                BatchState::Rejected,
                version,
                &TransitionEvidence::signed_with_reason(
                    rejection,
                    "contamination confirmed in two samples",
                ),
                &qa(),
            )
            .unwrap();
        assert_eq!(record.state, BatchState::Rejected);
        assert_eq!(env.deviations.open_count("B-100"), 1, "deviation stays open");
    }

    /// A signature taken before the record last changed is stale evidence.
    #[test]
    fn stale_signature_is_rejected_as_evidence() {
        let env = env();
        let version = to_qa_review(&env, "B-100");

        let qa_signature = sign_batch(
            &env,
            "B-100",
            qa(),
            SigningMeaning::ReleaseApproval,
            "all specifications met",
        );

        // The record changes after signing.
        env.machine.record_yield("B-100", 48.7, &qa()).unwrap();

        let result = env.machine.transition(
            "B-100",
            BatchState::Released,
            version + 1,
            &TransitionEvidence::signed(qa_signature),
            &qa(),
        );
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(
                    reason.contains("changed since signing"),
                    "unexpected reason: {reason}"
                );
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    /// Successful transitions append an UPDATE event capturing old → new
    /// state before the record mutates.
    #[test]
    fn transitions_audit_old_and_new_state() {
        let env = env();
        env.machine.start_batch(draft("B-100"), &operator()).unwrap();
        perform_step(&env, "B-100", 1);
        let version = env.machine.get("B-100").unwrap().version;
        env.machine
            .transition(
                "B-100",
                BatchState::InProgress,
                version,
                &TransitionEvidence::none(),
                &operator(),
            )
            .unwrap();

        let trail = env.ledger.entity_trail(EntityType::Batch, "B-100");
        let update = trail
            .iter()
            .find(|e| e.action == ActionKind::Update)
            .expect("transition must append an UPDATE event");
        assert_eq!(
            update.old_value,
            Some(ebrx_contracts::audit::Snapshot::Batch {
                state: BatchState::Draft,
                version: 1,
            })
        );
        assert_eq!(
            update.new_value,
            Some(ebrx_contracts::audit::Snapshot::Batch {
                state: BatchState::InProgress,
                version: 2,
            })
        );
    }
}
