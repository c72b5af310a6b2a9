//! # ebrx-report
//!
//! Read-only ALCOA+ / Part 11 compliance reporter for the EBRX compliance
//! core. Aggregates the audit ledger and current batch records into a
//! `ComplianceReport` for a given time window; mutates nothing and owns no
//! state of its own.

pub mod reporter;

pub use reporter::{ComplianceReporter, ReporterConfig};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use ebrx_batch::BatchStateMachine;
    use ebrx_contracts::{
        actor::{Actor, Role},
        audit::{ActionKind, EntityType, EventDraft, Severity, Snapshot},
        batch::{BatchDraft, BatchState, ProcessStep, ProductType, TransitionEvidence},
        deviation::DeviationSeverity,
        report::TimeRange,
        signature::{SignatureRequest, SigningMeaning},
    };
    use ebrx_deviation::DeviationManager;
    use ebrx_esign::{SignatureService, SigningKeypair, TomlSigningPolicy};
    use ebrx_ledger::{content_hash, AuditLedger, LedgerConfig};

    use super::{ComplianceReporter, ReporterConfig};

    const TEST_POLICY: &str = r#"
        [[rules]]
        id = "everyone-signs-anything"
        description = "Permissive policy for reporter tests"
        role = "*"
        meaning = "*"
        permit = true
    "#;

    fn operator() -> Actor {
        Actor::new("USR-001", "Jo Operator", Role::new("manufacturing-operator"))
    }

    struct Env {
        ledger: Arc<AuditLedger>,
        signatures: Arc<SignatureService>,
        deviations: Arc<DeviationManager>,
        machine: Arc<BatchStateMachine>,
        reporter: ComplianceReporter,
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
        let machine = Arc::new(BatchStateMachine::new(
            Arc::clone(&ledger),
            Arc::clone(&signatures),
            Arc::clone(&deviations),
        ));
        let reporter = ComplianceReporter::new(
            Arc::clone(&ledger),
            Arc::clone(&machine),
            Arc::clone(&deviations),
            ReporterConfig::default(),
        );
        Env {
            ledger,
            signatures,
            deviations,
            machine,
            reporter,
        }
    }

    /// Seed a batch with one signed step, one blocked transition attempt,
    /// and one open Minor deviation.
    fn seed(env: &Env) {
        env.machine
            .start_batch(
                BatchDraft {
                    batch_id: "B-100".to_string(),
                    product: ProductType::MonoclonalAntibody,
                    product_name: "mAb-A".to_string(),
                    target_yield: 50.0,
                    steps: vec![ProcessStep::new(1, "Inoculation", "SOP-INOC-001-v3", true)],
                },
                &operator(),
            )
            .unwrap();

        let record = env.machine.get("B-100").unwrap();
        let signature = env
            .signatures
            .sign(
                SignatureRequest {
                    record_id: "B-100".to_string(),
                    content_hash: content_hash(&record),
                    signer: operator(),
                    meaning: SigningMeaning::Performed,
                    reason: String::new(),
                    credential: "otp-123".to_string(),
                },
                &record,
            )
            .unwrap();
        env.machine
            .record_step("B-100", 1, &operator(), Some(&signature))
            .unwrap();

        // One blocked transition for the forensic counter.
        let _ = env.machine.transition(
            "B-100",
            BatchState::Released,
            1,
            &TransitionEvidence::none(),
            &operator(),
        );

        env.deviations
            .open_deviation("B-100", "Minor pH drift", DeviationSeverity::Minor, &operator())
            .unwrap();
    }

    fn window() -> TimeRange {
        TimeRange::new(
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
        )
    }

    #[test]
    fn report_aggregates_signatures_rejections_and_deviations() {
        let env = env();
        seed(&env);

        let report = env.reporter.generate_report(&window());

        assert!(report.ledger_intact);
        assert_eq!(report.total_events, env.ledger.len());
        assert_eq!(
            report.signature_counts.get(&SigningMeaning::Performed),
            Some(&1)
        );
        assert_eq!(report.rejected_transition_attempts, 1);
        assert!(report.critical_findings.is_empty());

        assert_eq!(report.batches.len(), 1);
        let entry = &report.batches[0];
        assert_eq!(entry.batch_id, "B-100");
        assert_eq!(entry.state, BatchState::Draft);
        assert_eq!(entry.open_deviations, 1);
        assert_eq!(entry.lifecycle_seconds, None, "batch is not terminal yet");
    }

    #[test]
    fn alcoa_checklist_passes_for_a_clean_trail() {
        let env = env();
        seed(&env);

        let report = env.reporter.generate_report(&window());
        let alcoa = &report.batches[0].alcoa;

        assert!(alcoa.compliant(), "clean trail must be ALCOA+ compliant: {:?}", alcoa.issues);
        assert!(alcoa.issues.is_empty());
    }

    /// A window that predates the batch has no trail: Complete and Available
    /// fail, with named findings.
    #[test]
    fn alcoa_flags_fail_outside_the_window() {
        let env = env();
        seed(&env);

        let stale_window = TimeRange::new(
            Utc::now() - chrono::Duration::days(30),
            Utc::now() - chrono::Duration::days(29),
        );
        let report = env.reporter.generate_report(&stale_window);
        let alcoa = &report.batches[0].alcoa;

        assert!(!alcoa.complete);
        assert!(!alcoa.available);
        assert!(!alcoa.compliant());
        assert!(alcoa.issues.iter().any(|i| i.contains("no audit trail")));
    }

    /// CRITICAL events recorded by external collaborators surface in the
    /// findings list.
    #[test]
    fn critical_events_are_surfaced() {
        let env = env();
        seed(&env);

        env.ledger
            .append(EventDraft {
                actor: operator(),
                action: ActionKind::Create,
                entity_type: EntityType::Deviation,
                entity_id: "contamination-alert".to_string(),
                old_value: None,
                new_value: Some(Snapshot::Deviation {
                    severity: DeviationSeverity::Major,
                    status: ebrx_contracts::deviation::DeviationStatus::Open,
                }),
                reason: None,
                severity: Severity::Critical,
            })
            .unwrap();

        let report = env.reporter.generate_report(&window());
        assert_eq!(report.critical_findings.len(), 1);
        assert_eq!(report.critical_findings[0].entity_id, "contamination-alert");
    }

    /// Two generations over the same window with no new events are
    /// byte-identical.
    #[test]
    fn report_is_idempotent() {
        let env = env();
        seed(&env);

        let range = window();
        let first = env.reporter.generate_report(&range);
        let second = env.reporter.generate_report(&range);
        assert_eq!(first, second);
    }
}
