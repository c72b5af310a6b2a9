//! Deviation lifecycle: open → investigate → close.
//!
//! Every accepted action lands in the audit ledger before the in-memory
//! deviation is updated. The manager's store is the single view of deviation
//! state the batch state machine consults, so a closure is visible to the
//! release gate the instant it commits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use ebrx_contracts::{
    actor::Actor,
    audit::{ActionKind, EntityType, EventDraft, Severity, Snapshot},
    deviation::{Deviation, DeviationId, DeviationSeverity, DeviationStatus, Investigation},
    error::{ComplianceError, ComplianceResult},
    signature::{ElectronicSignature, SigningMeaning},
};
use ebrx_ledger::AuditLedger;
use ebrx_esign::SignatureService;

/// Tracks process deviations and their investigation/closure state.
pub struct DeviationManager {
    ledger: Arc<AuditLedger>,
    signatures: Arc<SignatureService>,
    store: Mutex<HashMap<DeviationId, Deviation>>,
}

impl DeviationManager {
    pub fn new(ledger: Arc<AuditLedger>, signatures: Arc<SignatureService>) -> Self {
        Self {
            ledger,
            signatures,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Log a new deviation against a batch.
    ///
    /// Major deviations always require a documented investigation before
    /// closure.
    pub fn open_deviation(
        &self,
        batch_id: impl Into<String>,
        description: impl Into<String>,
        severity: DeviationSeverity,
        actor: &Actor,
    ) -> ComplianceResult<Deviation> {
        let batch_id = batch_id.into();
        let description = description.into();
        if description.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "a deviation requires a non-empty description".to_string(),
            });
        }

        let deviation = Deviation {
            deviation_id: DeviationId::new(),
            batch_id,
            description,
            severity,
            investigation_required: severity == DeviationSeverity::Major,
            status: DeviationStatus::Open,
            investigation: None,
            closing_signature_id: None,
            opened_by: actor.user_id.clone(),
            opened_at: Utc::now(),
            closed_at: None,
        };

        let mut store = self.store.lock().expect("deviation store lock poisoned");
        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Create,
            entity_type: EntityType::Deviation,
            entity_id: deviation.deviation_id.to_string(),
            old_value: None,
            new_value: Some(Snapshot::Deviation {
                severity,
                status: DeviationStatus::Open,
            }),
            reason: None,
            severity: match severity {
                DeviationSeverity::Major => Severity::Warning,
                DeviationSeverity::Minor => Severity::Info,
            },
        })?;
        store.insert(deviation.deviation_id, deviation.clone());

        info!(
            deviation_id = %deviation.deviation_id,
            batch_id = %deviation.batch_id,
            severity = %deviation.severity,
            "deviation opened"
        );

        Ok(deviation)
    }

    /// Attach investigation findings and a CAPA reference.
    pub fn attach_investigation(
        &self,
        deviation_id: DeviationId,
        findings: impl Into<String>,
        capa_ref: impl Into<String>,
        actor: &Actor,
    ) -> ComplianceResult<Deviation> {
        let findings = findings.into();
        let capa_ref = capa_ref.into();
        if findings.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "investigation findings must not be empty".to_string(),
            });
        }

        let mut store = self.store.lock().expect("deviation store lock poisoned");
        let deviation = store
            .get(&deviation_id)
            .ok_or_else(|| not_found(deviation_id))?
            .clone();

        if deviation.status == DeviationStatus::Closed {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "deviation '{deviation_id}' is closed; investigations cannot be amended"
                ),
            });
        }

        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Update,
            entity_type: EntityType::Deviation,
            entity_id: deviation_id.to_string(),
            old_value: Some(Snapshot::Deviation {
                severity: deviation.severity,
                status: deviation.status,
            }),
            new_value: Some(Snapshot::Deviation {
                severity: deviation.severity,
                status: DeviationStatus::UnderInvestigation,
            }),
            reason: Some(format!("investigation attached (CAPA: {capa_ref})")),
            severity: Severity::Info,
        })?;

        let updated = {
            let entry = store
                .get_mut(&deviation_id)
                .expect("deviation vanished while store lock held");
            entry.status = DeviationStatus::UnderInvestigation;
            entry.investigation = Some(Investigation {
                findings,
                capa_ref,
                investigated_by: actor.user_id.clone(),
                investigated_at: Utc::now(),
            });
            entry.clone()
        };

        Ok(updated)
    }

    /// Close a deviation with a verified closing signature.
    ///
    /// The signature must have the deviation-closure meaning, name this
    /// deviation as its record, and verify against the deviation's current
    /// content. A `Major` deviation additionally requires an attached
    /// investigation.
    pub fn close_deviation(
        &self,
        deviation_id: DeviationId,
        closing_signature: &ElectronicSignature,
        actor: &Actor,
    ) -> ComplianceResult<Deviation> {
        let mut store = self.store.lock().expect("deviation store lock poisoned");
        let deviation = store
            .get(&deviation_id)
            .ok_or_else(|| not_found(deviation_id))?
            .clone();

        if deviation.status == DeviationStatus::Closed {
            return Err(ComplianceError::Validation {
                reason: format!("deviation '{deviation_id}' is already closed"),
            });
        }

        if deviation.severity == DeviationSeverity::Major && deviation.investigation.is_none() {
            warn!(
                deviation_id = %deviation_id,
                "closure refused: Major deviation has no investigation"
            );
            return Err(ComplianceError::Validation {
                reason: format!(
                    "Major deviation '{deviation_id}' cannot be closed without an investigation"
                ),
            });
        }

        if closing_signature.meaning != SigningMeaning::DeviationClosure {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "closing signature has meaning '{}'; '{}' is required",
                    closing_signature.meaning,
                    SigningMeaning::DeviationClosure
                ),
            });
        }

        if closing_signature.record_id != deviation_id.to_string() {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "closing signature was issued for record '{}', not deviation '{deviation_id}'",
                    closing_signature.record_id
                ),
            });
        }

        if !self.signatures.verify(closing_signature, &deviation) {
            warn!(
                deviation_id = %deviation_id,
                signature_id = %closing_signature.signature_id,
                "closure refused: signature does not verify against current deviation content"
            );
            return Err(ComplianceError::Validation {
                reason: format!(
                    "closing signature does not verify against the current content of \
                     deviation '{deviation_id}'"
                ),
            });
        }

        self.ledger.append(EventDraft {
            actor: actor.clone(),
            action: ActionKind::Approve,
            entity_type: EntityType::Deviation,
            entity_id: deviation_id.to_string(),
            old_value: Some(Snapshot::Deviation {
                severity: deviation.severity,
                status: deviation.status,
            }),
            new_value: Some(Snapshot::Deviation {
                severity: deviation.severity,
                status: DeviationStatus::Closed,
            }),
            reason: Some(closing_signature.reason.clone()),
            severity: Severity::Info,
        })?;

        let updated = {
            let entry = store
                .get_mut(&deviation_id)
                .expect("deviation vanished while store lock held");
            entry.status = DeviationStatus::Closed;
            entry.closing_signature_id = Some(closing_signature.signature_id);
            entry.closed_at = Some(Utc::now());
            entry.clone()
        };

        info!(
            deviation_id = %deviation_id,
            batch_id = %updated.batch_id,
            "deviation closed"
        );

        Ok(updated)
    }

    /// Fetch one deviation by id.
    pub fn get(&self, deviation_id: DeviationId) -> ComplianceResult<Deviation> {
        let store = self.store.lock().expect("deviation store lock poisoned");
        store
            .get(&deviation_id)
            .cloned()
            .ok_or_else(|| not_found(deviation_id))
    }

    /// All deviations linked to a batch, newest last.
    pub fn for_batch(&self, batch_id: &str) -> Vec<Deviation> {
        let store = self.store.lock().expect("deviation store lock poisoned");
        let mut out: Vec<Deviation> = store
            .values()
            .filter(|d| d.batch_id == batch_id)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.opened_at);
        out
    }

    /// Open deviations of any severity for a batch.
    pub fn open_count(&self, batch_id: &str) -> usize {
        let store = self.store.lock().expect("deviation store lock poisoned");
        store
            .values()
            .filter(|d| d.batch_id == batch_id && d.is_open())
            .count()
    }

    /// Open Major deviations for a batch — the QC → QA gate.
    pub fn open_major_count(&self, batch_id: &str) -> usize {
        let store = self.store.lock().expect("deviation store lock poisoned");
        store
            .values()
            .filter(|d| {
                d.batch_id == batch_id && d.is_open() && d.severity == DeviationSeverity::Major
            })
            .count()
    }
}

fn not_found(deviation_id: DeviationId) -> ComplianceError {
    ComplianceError::NotFound {
        entity_kind: "deviation".to_string(),
        entity_id: deviation_id.to_string(),
    }
}
