//! The compliance core facade.
//!
//! `ComplianceCore` owns one instance of every component — ledger, signature
//! service, deviation manager, batch state machine, reporter — and exposes
//! the ingest boundary the excluded API/presentation layer forwards to.
//! Construction is explicit; there is no module-level state anywhere in the
//! workspace.

use std::sync::Arc;

use tracing::info;

use ebrx_batch::BatchStateMachine;
use ebrx_contracts::{
    actor::Actor,
    audit::{EntityType, EventDraft},
    batch::{BatchDraft, BatchRecord, BatchState, TransitionEvidence},
    deviation::{Deviation, DeviationId, DeviationSeverity},
    error::{ComplianceError, ComplianceResult},
    report::{ComplianceReport, TimeRange},
    signature::{ElectronicSignature, SignatureRequest},
};
use ebrx_deviation::DeviationManager;
use ebrx_esign::{SignatureService, SigningKeypair, SigningPolicy, TomlSigningPolicy};
use ebrx_ledger::{content_hash, AuditEvent, AuditLedger, LedgerConfig};
use ebrx_report::{ComplianceReporter, ReporterConfig};

/// Everything needed to stand up a compliance core.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub ledger: LedgerConfig,
    pub reporter: ReporterConfig,
    /// TOML signing-role policy document.
    pub signing_policy_toml: String,
}

/// One process-scoped compliance core instance.
pub struct ComplianceCore {
    ledger: Arc<AuditLedger>,
    signatures: Arc<SignatureService>,
    deviations: Arc<DeviationManager>,
    batches: Arc<BatchStateMachine>,
    reporter: ComplianceReporter,
}

impl ComplianceCore {
    /// Build a core from configuration, generating a fresh service keypair.
    ///
    /// Returns `Config` errors for a malformed signing policy.
    pub fn new(config: CoreConfig) -> ComplianceResult<Self> {
        let policy = TomlSigningPolicy::from_toml_str(&config.signing_policy_toml)?;
        Ok(Self::with_parts(
            config.ledger,
            config.reporter,
            Box::new(policy),
            SigningKeypair::generate(),
        ))
    }

    /// Build a core from pre-constructed trusted parts (custom policy
    /// implementation, persisted service key).
    pub fn with_parts(
        ledger_config: LedgerConfig,
        reporter_config: ReporterConfig,
        policy: Box<dyn SigningPolicy>,
        keypair: SigningKeypair,
    ) -> Self {
        let ledger = Arc::new(AuditLedger::new(ledger_config));
        let signatures = Arc::new(SignatureService::new(Arc::clone(&ledger), policy, keypair));
        let deviations = Arc::new(DeviationManager::new(
            Arc::clone(&ledger),
            Arc::clone(&signatures),
        ));
        let batches = Arc::new(BatchStateMachine::new(
            Arc::clone(&ledger),
            Arc::clone(&signatures),
            Arc::clone(&deviations),
        ));
        let reporter = ComplianceReporter::new(
            Arc::clone(&ledger),
            Arc::clone(&batches),
            Arc::clone(&deviations),
            reporter_config,
        );

        info!("compliance core constructed");

        Self {
            ledger,
            signatures,
            deviations,
            batches,
            reporter,
        }
    }

    // ── Ingest boundary ───────────────────────────────────────────────────────

    /// Record one domain event from an external collaborator (sensor
    /// ingestion, ML inference, API layer).
    pub fn record_event(&self, draft: EventDraft) -> ComplianceResult<AuditEvent> {
        self.ledger.append(draft)
    }

    /// Issue an electronic signature over the current content of the record
    /// named in the request. The record id is resolved against batches
    /// first, then deviations.
    pub fn request_signature(
        &self,
        request: SignatureRequest,
    ) -> ComplianceResult<ElectronicSignature> {
        if let Ok(record) = self.batches.get(&request.record_id) {
            return self.signatures.sign(request, &record);
        }
        if let Some(deviation) = self.find_deviation(&request.record_id) {
            return self.signatures.sign(request, &deviation);
        }
        Err(ComplianceError::NotFound {
            entity_kind: "record".to_string(),
            entity_id: request.record_id,
        })
    }

    /// Attempt a batch lifecycle transition.
    pub fn request_transition(
        &self,
        batch_id: &str,
        target: BatchState,
        expected_version: u64,
        evidence: &TransitionEvidence,
        actor: &Actor,
    ) -> ComplianceResult<BatchRecord> {
        self.batches
            .transition(batch_id, target, expected_version, evidence, actor)
    }

    /// The ordered audit trail for one entity.
    pub fn get_entity_trail(&self, entity_type: EntityType, entity_id: &str) -> Vec<AuditEvent> {
        self.ledger.entity_trail(entity_type, entity_id)
    }

    /// Generate the compliance report for a time window.
    pub fn get_compliance_report(&self, range: &TimeRange) -> ComplianceReport {
        self.reporter.generate_report(range)
    }

    /// Check a signature against the current content of its record.
    ///
    /// `Ok(false)` means the record changed since signing (or the signature
    /// value is forged); the signature is dead and stays dead.
    pub fn verify_signature(&self, signature: &ElectronicSignature) -> ComplianceResult<bool> {
        if let Ok(record) = self.batches.get(&signature.record_id) {
            return Ok(self.signatures.verify(signature, &record));
        }
        if let Some(deviation) = self.find_deviation(&signature.record_id) {
            return Ok(self.signatures.verify(signature, &deviation));
        }
        Err(ComplianceError::NotFound {
            entity_kind: "record".to_string(),
            entity_id: signature.record_id.clone(),
        })
    }

    /// The current content hash of a batch or deviation — what a caller
    /// declares when requesting a signature.
    pub fn current_content_hash(&self, record_id: &str) -> ComplianceResult<String> {
        if let Ok(record) = self.batches.get(record_id) {
            return Ok(content_hash(&record));
        }
        if let Some(deviation) = self.find_deviation(record_id) {
            return Ok(content_hash(&deviation));
        }
        Err(ComplianceError::NotFound {
            entity_kind: "record".to_string(),
            entity_id: record_id.to_string(),
        })
    }

    // ── Batch operations ──────────────────────────────────────────────────────

    pub fn start_batch(&self, draft: BatchDraft, actor: &Actor) -> ComplianceResult<BatchRecord> {
        self.batches.start_batch(draft, actor)
    }

    pub fn record_step(
        &self,
        batch_id: &str,
        step_number: u32,
        actor: &Actor,
        signature: Option<&ElectronicSignature>,
    ) -> ComplianceResult<BatchRecord> {
        self.batches.record_step(batch_id, step_number, actor, signature)
    }

    pub fn record_yield(
        &self,
        batch_id: &str,
        actual_yield: f64,
        actor: &Actor,
    ) -> ComplianceResult<BatchRecord> {
        self.batches.record_yield(batch_id, actual_yield, actor)
    }

    pub fn get_batch(&self, batch_id: &str) -> ComplianceResult<BatchRecord> {
        self.batches.get(batch_id)
    }

    // ── Deviation operations ──────────────────────────────────────────────────

    /// Open a deviation against an existing batch and link it to the batch
    /// record.
    pub fn open_deviation(
        &self,
        batch_id: &str,
        description: impl Into<String>,
        severity: DeviationSeverity,
        actor: &Actor,
    ) -> ComplianceResult<Deviation> {
        // The batch must exist before a deviation can reference it.
        self.batches.get(batch_id)?;
        let deviation = self
            .deviations
            .open_deviation(batch_id, description, severity, actor)?;
        self.batches.link_deviation(batch_id, deviation.deviation_id)?;
        Ok(deviation)
    }

    pub fn attach_investigation(
        &self,
        deviation_id: DeviationId,
        findings: impl Into<String>,
        capa_ref: impl Into<String>,
        actor: &Actor,
    ) -> ComplianceResult<Deviation> {
        self.deviations
            .attach_investigation(deviation_id, findings, capa_ref, actor)
    }

    pub fn close_deviation(
        &self,
        deviation_id: DeviationId,
        closing_signature: &ElectronicSignature,
        actor: &Actor,
    ) -> ComplianceResult<Deviation> {
        self.deviations
            .close_deviation(deviation_id, closing_signature, actor)
    }

    pub fn get_deviation(&self, deviation_id: DeviationId) -> ComplianceResult<Deviation> {
        self.deviations.get(deviation_id)
    }

    pub fn deviations_for_batch(&self, batch_id: &str) -> Vec<Deviation> {
        self.deviations.for_batch(batch_id)
    }

    // ── Ledger administration ─────────────────────────────────────────────────

    /// Verify the full hash chain.
    pub fn verify_ledger(&self) -> ComplianceResult<()> {
        self.ledger.verify()
    }

    /// Lift an integrity write hold after administrative review.
    pub fn clear_integrity_hold(
        &self,
        actor: &Actor,
        reason: &str,
    ) -> ComplianceResult<AuditEvent> {
        self.ledger.clear_integrity_hold(actor, reason)
    }

    /// The compact commitment to the entire ledger: the head event hash.
    pub fn ledger_head_hash(&self) -> String {
        self.ledger.head_hash()
    }

    /// Number of committed audit events.
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn find_deviation(&self, record_id: &str) -> Option<Deviation> {
        let id = uuid::Uuid::parse_str(record_id).ok()?;
        self.deviations.get(DeviationId(id)).ok()
    }
}
