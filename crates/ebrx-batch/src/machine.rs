//! The batch record lifecycle state machine.
//!
//! The machine enforces the execution model for every mutation of a batch
//! record:
//!
//!   version check → table check → evidence preconditions → audit append → mutate
//!
//! The security invariant is structural: the record is never mutated until
//! its audit event has committed, and no precondition is taken from the
//! caller's word — signatures are re-verified against the record's current
//! content, step completion is read from the machine's own state, and
//! deviation counts come from the deviation manager's live view at commit
//! time.
//!
//! Rejected attempts are themselves compliance-relevant: every blocked
//! transition appends a WARNING-severity REJECT event naming the violated
//! precondition before the `Validation` error is returned.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use ebrx_contracts::{
    actor::Actor,
    audit::{ActionKind, EntityType, EventDraft, Severity, Snapshot},
    batch::{BatchDraft, BatchRecord, BatchState, TransitionEvidence},
    deviation::DeviationId,
    error::{ComplianceError, ComplianceResult},
    signature::{ElectronicSignature, SigningMeaning},
};
use ebrx_deviation::DeviationManager;
use ebrx_esign::SignatureService;
use ebrx_ledger::AuditLedger;

use crate::table::transition_allowed;

/// Governs the lifecycle of every batch record.
pub struct BatchStateMachine {
    ledger: Arc<AuditLedger>,
    signatures: Arc<SignatureService>,
    deviations: Arc<DeviationManager>,
    store: Mutex<HashMap<String, BatchRecord>>,
}

impl BatchStateMachine {
    pub fn new(
        ledger: Arc<AuditLedger>,
        signatures: Arc<SignatureService>,
        deviations: Arc<DeviationManager>,
    ) -> Self {
        Self {
            ledger,
            signatures,
            deviations,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Open a new batch record in `Draft` at version 0.
    pub fn start_batch(&self, draft: BatchDraft, actor: &Actor) -> ComplianceResult<BatchRecord> {
        if draft.batch_id.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "batch_id must not be empty".to_string(),
            });
        }
        if draft.steps.is_empty() {
            return Err(ComplianceError::Validation {
                reason: "a batch needs at least one process step".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for step in &draft.steps {
            if !seen.insert(step.step_number) {
                return Err(ComplianceError::Validation {
                    reason: format!("duplicate step number {} in step plan", step.step_number),
                });
            }
        }

        let mut store = self.store.lock().expect("batch store lock poisoned");
        if store.contains_key(&draft.batch_id) {
            return Err(ComplianceError::Validation {
                reason: format!("batch '{}' already exists", draft.batch_id),
            });
        }

        let record = BatchRecord {
            batch_id: draft.batch_id,
            product: draft.product,
            product_name: draft.product_name,
            state: BatchState::Draft,
            started_at: Utc::now(),
            completed_at: None,
            target_yield: draft.target_yield,
            actual_yield: None,
            steps: draft.steps,
            deviation_ids: Vec::new(),
            version: 0,
        };

        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Create,
            entity_type: EntityType::Batch,
            entity_id: record.batch_id.clone(),
            old_value: None,
            new_value: Some(Snapshot::Batch {
                state: BatchState::Draft,
                version: 0,
            }),
            reason: None,
            severity: Severity::Info,
        })?;
        store.insert(record.batch_id.clone(), record.clone());

        info!(batch_id = %record.batch_id, product = %record.product_name, "batch record opened");

        Ok(record)
    }

    /// Record one process step as performed.
    ///
    /// Mandatory steps carry their own signature requirement: a `performed`
    /// signature over the record's current content must accompany them.
    /// Steps can be recorded while the batch is in `Draft` or `In Progress`;
    /// once the record is under review its execution history is frozen.
    pub fn record_step(
        &self,
        batch_id: &str,
        step_number: u32,
        actor: &Actor,
        signature: Option<&ElectronicSignature>,
    ) -> ComplianceResult<BatchRecord> {
        let mut store = self.store.lock().expect("batch store lock poisoned");
        let record = store
            .get(batch_id)
            .ok_or_else(|| not_found(batch_id))?
            .clone();

        if !matches!(record.state, BatchState::Draft | BatchState::InProgress) {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "steps cannot be recorded while batch '{batch_id}' is in state '{}'",
                    record.state
                ),
            });
        }

        let step = record.step(step_number).ok_or_else(|| ComplianceError::Validation {
            reason: format!("batch '{batch_id}' has no step {step_number}"),
        })?;
        if step.is_complete() {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "step {step_number} ('{}') of batch '{batch_id}' is already recorded",
                    step.step_name
                ),
            });
        }

        let signature_id = if step.mandatory {
            let signature = signature.ok_or_else(|| ComplianceError::Validation {
                reason: format!(
                    "mandatory step {step_number} ('{}') requires a 'performed' signature",
                    step.step_name
                ),
            })?;
            self.check_signature(&record, signature, SigningMeaning::Performed)
                .map_err(|reason| ComplianceError::Validation { reason })?;
            Some(signature.signature_id)
        } else {
            signature.map(|s| s.signature_id)
        };

        let step_name = step.step_name.clone();
        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Update,
            entity_type: EntityType::ProcessStep,
            entity_id: format!("{batch_id}/step-{step_number}"),
            old_value: Some(Snapshot::ProcessStep {
                step_number,
                step_name: step_name.clone(),
                completed: false,
            }),
            new_value: Some(Snapshot::ProcessStep {
                step_number,
                step_name: step_name.clone(),
                completed: true,
            }),
            reason: Some(format!("step '{step_name}' performed by {}", actor.user_id)),
            severity: Severity::Info,
        })?;

        let record = store
            .get_mut(batch_id)
            .expect("batch vanished while store lock held");
        let step = record
            .steps
            .iter_mut()
            .find(|s| s.step_number == step_number)
            .expect("step vanished while store lock held");
        step.performed_by = Some(actor.user_id.clone());
        step.completed_at = Some(Utc::now());
        step.signature_id = signature_id;
        record.version += 1;

        Ok(record.clone())
    }

    /// Record the actual yield once manufacturing output is known.
    pub fn record_yield(
        &self,
        batch_id: &str,
        actual_yield: f64,
        actor: &Actor,
    ) -> ComplianceResult<BatchRecord> {
        let mut store = self.store.lock().expect("batch store lock poisoned");
        let record = store
            .get(batch_id)
            .ok_or_else(|| not_found(batch_id))?
            .clone();

        if record.state.is_terminal() {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "batch '{batch_id}' is in terminal state '{}'; yield can no longer change",
                    record.state
                ),
            });
        }

        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Update,
            entity_type: EntityType::Batch,
            entity_id: batch_id.to_string(),
            old_value: Some(Snapshot::Batch {
                state: record.state,
                version: record.version,
            }),
            new_value: Some(Snapshot::Batch {
                state: record.state,
                version: record.version + 1,
            }),
            reason: Some(format!(
                "actual yield recorded: {actual_yield:.2} kg (target {:.2} kg)",
                record.target_yield
            )),
            severity: Severity::Info,
        })?;

        let record = store
            .get_mut(batch_id)
            .expect("batch vanished while store lock held");
        record.actual_yield = Some(actual_yield);
        record.version += 1;

        Ok(record.clone())
    }

    /// Link a deviation to its batch so the record lists it.
    ///
    /// The deviation manager owns deviation state; this only maintains the
    /// record's reference list (and bumps the version, because the record's
    /// content changed).
    pub fn link_deviation(
        &self,
        batch_id: &str,
        deviation_id: DeviationId,
    ) -> ComplianceResult<BatchRecord> {
        let mut store = self.store.lock().expect("batch store lock poisoned");
        let record = store
            .get_mut(batch_id)
            .ok_or_else(|| not_found(batch_id))?;
        if !record.deviation_ids.contains(&deviation_id) {
            record.deviation_ids.push(deviation_id);
            record.version += 1;
        }
        Ok(record.clone())
    }

    /// Attempt a lifecycle transition.
    ///
    /// `expected_version` implements optimistic concurrency: if another
    /// caller moved the record first, the attempt fails with `Conflict` and
    /// no side effects. Invalid or under-evidenced attempts fail with
    /// `Validation`, leave the record untouched, and are themselves recorded
    /// as WARNING events for forensic review.
    pub fn transition(
        &self,
        batch_id: &str,
        target: BatchState,
        expected_version: u64,
        evidence: &TransitionEvidence,
        actor: &Actor,
    ) -> ComplianceResult<BatchRecord> {
        let mut store = self.store.lock().expect("batch store lock poisoned");
        let record = store
            .get(batch_id)
            .ok_or_else(|| not_found(batch_id))?
            .clone();

        if record.version != expected_version {
            return Err(ComplianceError::Conflict {
                record_id: batch_id.to_string(),
                expected: expected_version,
                actual: record.version,
            });
        }

        if !transition_allowed(record.state, target) {
            let reason = format!(
                "transition '{}' -> '{target}' is not in the lifecycle table",
                record.state
            );
            return Err(self.reject_attempt(&record, target, reason, actor));
        }

        if let Err(reason) = self.check_preconditions(&record, target, evidence) {
            return Err(self.reject_attempt(&record, target, reason, actor));
        }

        // All gates passed: one short serialized commit — audit first, then
        // the in-memory mutation.
        let transition_reason = evidence
            .reason
            .clone()
            .unwrap_or_else(|| format!("state transition '{}' -> '{target}'", record.state));

        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Update,
            entity_type: EntityType::Batch,
            entity_id: batch_id.to_string(),
            old_value: Some(Snapshot::Batch {
                state: record.state,
                version: record.version,
            }),
            new_value: Some(Snapshot::Batch {
                state: target,
                version: record.version + 1,
            }),
            reason: Some(transition_reason.clone()),
            severity: Severity::Info,
        })?;

        // Terminal dispositions get their own decision event on top of the
        // state-change event.
        match target {
            BatchState::Released => {
                self.ledger.append(EventDraft {
                    actor: actor.clone(),
                    action: ActionKind::Approve,
                    entity_type: EntityType::Batch,
                    entity_id: batch_id.to_string(),
                    old_value: None,
                    new_value: Some(Snapshot::Batch {
                        state: target,
                        version: record.version + 1,
                    }),
                    reason: Some(transition_reason.clone()),
                    severity: Severity::Info,
                })?;
            }
            BatchState::Rejected => {
                self.ledger.append(EventDraft {
                    actor: actor.clone(),
                    action: ActionKind::Reject,
                    entity_type: EntityType::Batch,
                    entity_id: batch_id.to_string(),
                    old_value: None,
                    new_value: Some(Snapshot::Batch {
                        state: target,
                        version: record.version + 1,
                    }),
                    reason: Some(transition_reason.clone()),
                    severity: Severity::Info,
                })?;
            }
            _ => {}
        }

        let record = store
            .get_mut(batch_id)
            .expect("batch vanished while store lock held");
        record.state = target;
        record.version += 1;
        if target.is_terminal() {
            record.completed_at = Some(Utc::now());
        }

        info!(
            batch_id,
            state = %record.state,
            version = record.version,
            "batch transitioned"
        );

        Ok(record.clone())
    }

    /// Fetch one batch record by id.
    pub fn get(&self, batch_id: &str) -> ComplianceResult<BatchRecord> {
        let store = self.store.lock().expect("batch store lock poisoned");
        store
            .get(batch_id)
            .cloned()
            .ok_or_else(|| not_found(batch_id))
    }

    /// All batch records, ordered by batch id.
    pub fn all(&self) -> Vec<BatchRecord> {
        let store = self.store.lock().expect("batch store lock poisoned");
        let mut out: Vec<BatchRecord> = store.values().cloned().collect();
        out.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        out
    }

    // ── Internal gates ────────────────────────────────────────────────────────

    /// Evidence preconditions per target state. Returns the violated
    /// precondition as text for the caller to wrap.
    fn check_preconditions(
        &self,
        record: &BatchRecord,
        target: BatchState,
        evidence: &TransitionEvidence,
    ) -> Result<(), String> {
        match target {
            BatchState::InProgress => {
                if !record.start_step_recorded() {
                    return Err(
                        "the inoculation/start step has not been recorded".to_string()
                    );
                }
            }

            BatchState::QcReview => {
                if !record.mandatory_steps_complete() {
                    let missing: Vec<String> = record
                        .steps
                        .iter()
                        .filter(|s| s.mandatory && !s.is_complete())
                        .map(|s| format!("{} ('{}')", s.step_number, s.step_name))
                        .collect();
                    return Err(format!(
                        "mandatory process steps not recorded: {}",
                        missing.join(", ")
                    ));
                }
            }

            BatchState::QaReview => {
                self.require_signature(record, evidence, SigningMeaning::Reviewed)?;
                let open_major = self.deviations.open_major_count(&record.batch_id);
                if open_major > 0 {
                    return Err(format!(
                        "{open_major} open Major deviation(s) block QA review"
                    ));
                }
            }

            BatchState::Released => {
                self.require_signature(record, evidence, SigningMeaning::ReleaseApproval)?;
                let open = self.deviations.open_count(&record.batch_id);
                if open > 0 {
                    return Err(format!(
                        "{open} open deviation(s) of any severity block release"
                    ));
                }
            }

            BatchState::Rejected => {
                self.require_signature(record, evidence, SigningMeaning::Rejection)?;
                if evidence
                    .reason
                    .as_deref()
                    .is_none_or(|r| r.trim().is_empty())
                {
                    return Err("rejection requires a recorded reason".to_string());
                }
                // Open deviations do NOT block rejection: a rejected batch
                // still has its deviations closed out-of-band.
            }

            BatchState::Draft => {
                return Err("no transition re-enters Draft".to_string());
            }
        }
        Ok(())
    }

    fn require_signature<'a>(
        &self,
        record: &BatchRecord,
        evidence: &'a TransitionEvidence,
        meaning: SigningMeaning,
    ) -> Result<&'a ElectronicSignature, String> {
        let signature = evidence
            .signature
            .as_ref()
            .ok_or_else(|| format!("a '{meaning}' signature is required"))?;
        self.check_signature(record, signature, meaning)?;
        Ok(signature)
    }

    /// Re-verify a caller-supplied signature against the record's current
    /// content. Evidence is never taken on trust.
    fn check_signature(
        &self,
        record: &BatchRecord,
        signature: &ElectronicSignature,
        meaning: SigningMeaning,
    ) -> Result<(), String> {
        if signature.meaning != meaning {
            return Err(format!(
                "signature has meaning '{}'; '{meaning}' is required",
                signature.meaning
            ));
        }
        if signature.record_id != record.batch_id {
            return Err(format!(
                "signature was issued for record '{}', not batch '{}'",
                signature.record_id, record.batch_id
            ));
        }
        if !self.signatures.verify(signature, record) {
            return Err(format!(
                "'{meaning}' signature does not verify against the current record content \
                 (the record changed since signing)"
            ));
        }
        Ok(())
    }

    /// Record a blocked transition attempt and build the error to return.
    ///
    /// The forensic event is best-effort: if the ledger is under an
    /// integrity hold the append fails, which is logged but does not mask
    /// the validation error the caller needs to see.
    fn reject_attempt(
        &self,
        record: &BatchRecord,
        target: BatchState,
        reason: String,
        actor: &Actor,
    ) -> ComplianceError {
        warn!(
            batch_id = %record.batch_id,
            from = %record.state,
            to = %target,
            %reason,
            "transition attempt rejected"
        );

        let forensic = self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Reject,
            entity_type: EntityType::Batch,
            entity_id: record.batch_id.clone(),
            old_value: Some(Snapshot::Batch {
                state: record.state,
                version: record.version,
            }),
            new_value: Some(Snapshot::Batch {
                state: target,
                version: record.version,
            }),
            reason: Some(format!("blocked transition attempt: {reason}")),
            severity: Severity::Warning,
        });
        if let Err(e) = forensic {
            warn!(batch_id = %record.batch_id, error = %e, "could not record forensic event");
        }

        ComplianceError::Validation { reason }
    }
}

fn not_found(batch_id: &str) -> ComplianceError {
    ComplianceError::NotFound {
        entity_kind: "batch".to_string(),
        entity_id: batch_id.to_string(),
    }
}
