//! # ebrx-deviation
//!
//! Deviation and CAPA lifecycle manager for the EBRX compliance core.
//!
//! A deviation is opened against a batch, optionally investigated (always,
//! for Major severity), and closed under a verified electronic signature.
//! Deviations are never deleted, and the manager's open-count view is what
//! gates batch release.

pub mod manager;

pub use manager::DeviationManager;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ebrx_contracts::{
        actor::{Actor, Role},
        audit::Severity,
        deviation::{DeviationSeverity, DeviationStatus},
        error::ComplianceError,
        signature::{ElectronicSignature, SignatureRequest, SigningMeaning},
    };
    use ebrx_esign::{SignatureService, SigningKeypair, TomlSigningPolicy};
    use ebrx_ledger::{content_hash, AuditLedger, EventFilter, LedgerConfig};

    use super::DeviationManager;

    const TEST_POLICY: &str = r#"
        [[rules]]
        id = "qa-closes-deviations"
        description = "QA managers sign deviation closures"
        role = "qa-manager"
        meaning = "deviation-closure"
        permit = true
    "#;

    fn qa() -> Actor {
        Actor::new("USR-900", "Alex QA", Role::new("qa-manager"))
    }

    fn operator() -> Actor {
        Actor::new("USR-001", "Jo Operator", Role::new("manufacturing-operator"))
    }

    struct Env {
        ledger: Arc<AuditLedger>,
        signatures: Arc<SignatureService>,
        manager: DeviationManager,
    }

    fn env() -> Env {
        let ledger = Arc::new(AuditLedger::new(LedgerConfig::default()));
        let signatures = Arc::new(SignatureService::new(
            Arc::clone(&ledger),
            Box::new(TomlSigningPolicy::from_toml_str(TEST_POLICY).unwrap()),
            SigningKeypair::generate(),
        ));
        let manager = DeviationManager::new(Arc::clone(&ledger), Arc::clone(&signatures));
        Env {
            ledger,
            signatures,
            manager,
        }
    }

    /// Sign the deviation's current content with the closure meaning.
    fn closure_signature(
        env: &Env,
        deviation_id: ebrx_contracts::deviation::DeviationId,
    ) -> ElectronicSignature {
        let deviation = env.manager.get(deviation_id).unwrap();
        env.signatures
            .sign(
                SignatureRequest {
                    record_id: deviation_id.to_string(),
                    content_hash: content_hash(&deviation),
                    signer: qa(),
                    meaning: SigningMeaning::DeviationClosure,
                    reason: "investigation reviewed, product impact excluded".to_string(),
                    credential: "otp-654321".to_string(),
                },
                &deviation,
            )
            .unwrap()
    }

    // ── Opening ───────────────────────────────────────────────────────────────

    #[test]
    fn open_major_requires_investigation_and_audits_as_warning() {
        let env = env();
        let deviation = env
            .manager
            .open_deviation("B-100", "Temperature excursion to 39.1C", DeviationSeverity::Major, &operator())
            .unwrap();

        assert!(deviation.investigation_required);
        assert_eq!(deviation.status, DeviationStatus::Open);
        assert_eq!(env.manager.open_major_count("B-100"), 1);

        let events = env.ledger.query(&EventFilter::all());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[test]
    fn open_requires_description() {
        let env = env();
        let result =
            env.manager
                .open_deviation("B-100", "   ", DeviationSeverity::Minor, &operator());
        assert!(matches!(result, Err(ComplianceError::Validation { .. })));
        assert!(env.ledger.is_empty());
    }

    // ── Closure gating ────────────────────────────────────────────────────────

    #[test]
    fn major_cannot_close_without_investigation() {
        let env = env();
        let deviation = env
            .manager
            .open_deviation("B-100", "Filter integrity failure", DeviationSeverity::Major, &operator())
            .unwrap();

        let signature = closure_signature(&env, deviation.deviation_id);
        let result = env
            .manager
            .close_deviation(deviation.deviation_id, &signature, &qa());

        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("investigation"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
        assert_eq!(env.manager.open_count("B-100"), 1, "deviation must stay open");
    }

    #[test]
    fn close_rejects_wrong_signature_meaning() {
        let env = env();
        let deviation = env
            .manager
            .open_deviation("B-100", "Minor pH drift", DeviationSeverity::Minor, &operator())
            .unwrap();

        let mut signature = closure_signature(&env, deviation.deviation_id);
        signature.meaning = SigningMeaning::Approved;

        let result = env
            .manager
            .close_deviation(deviation.deviation_id, &signature, &qa());
        assert!(matches!(result, Err(ComplianceError::Validation { .. })));
    }

    /// A signature taken before the investigation was attached no longer
    /// matches the deviation's content and is refused.
    #[test]
    fn close_rejects_signature_over_stale_content() {
        let env = env();
        let deviation = env
            .manager
            .open_deviation("B-100", "Foam-out during feed", DeviationSeverity::Major, &operator())
            .unwrap();

        let stale_signature = closure_signature(&env, deviation.deviation_id);

        env.manager
            .attach_investigation(
                deviation.deviation_id,
                "Antifoam dosing pump ran dry",
                "CAPA-2024-017",
                &qa(),
            )
            .unwrap();

        let result = env
            .manager
            .close_deviation(deviation.deviation_id, &stale_signature, &qa());
        match result {
            Err(ComplianceError::Validation { reason }) => {
                assert!(reason.contains("does not verify"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    /// Full lifecycle: open → investigate → sign → close. The open counts
    /// drop the moment closure commits.
    #[test]
    fn full_closure_lifecycle() {
        let env = env();
        let deviation = env
            .manager
            .open_deviation("B-100", "Foam-out during feed", DeviationSeverity::Major, &operator())
            .unwrap();

        env.manager
            .attach_investigation(
                deviation.deviation_id,
                "Antifoam dosing pump ran dry; level alarm missed",
                "CAPA-2024-017",
                &qa(),
            )
            .unwrap();

        let signature = closure_signature(&env, deviation.deviation_id);
        let closed = env
            .manager
            .close_deviation(deviation.deviation_id, &signature, &qa())
            .unwrap();

        assert_eq!(closed.status, DeviationStatus::Closed);
        assert_eq!(closed.closing_signature_id, Some(signature.signature_id));
        assert!(closed.closed_at.is_some());
        assert_eq!(env.manager.open_count("B-100"), 0);
        assert_eq!(env.manager.open_major_count("B-100"), 0);

        // Re-closing is refused.
        let again = env
            .manager
            .close_deviation(deviation.deviation_id, &signature, &qa());
        assert!(matches!(again, Err(ComplianceError::Validation { .. })));
    }

    #[test]
    fn investigation_cannot_be_amended_after_closure() {
        let env = env();
        let deviation = env
            .manager
            .open_deviation("B-100", "Minor pH drift", DeviationSeverity::Minor, &operator())
            .unwrap();
        let signature = closure_signature(&env, deviation.deviation_id);
        env.manager
            .close_deviation(deviation.deviation_id, &signature, &qa())
            .unwrap();

        let result = env.manager.attach_investigation(
            deviation.deviation_id,
            "late findings",
            "CAPA-2024-099",
            &qa(),
        );
        assert!(matches!(result, Err(ComplianceError::Validation { .. })));
    }
}
