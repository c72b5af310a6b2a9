//! The electronic signature service.
//!
//! `sign()` is the only way a signature comes into existence, and it has
//! exactly two effects or none: the returned `ElectronicSignature` and one
//! `ELECTRONIC_SIGNATURE` audit event. The ledger append happens before the
//! signature is released to the caller, so a signature is never issued
//! without its audit entry, and the audit entry always references a
//! signature that exists.
//!
//! Signature values are Ed25519 over a canonical signing digest:
//!
//!   SHA-256( signer_id ‖ ":" ‖ record_id ‖ ":" ‖ meaning ‖ ":" ‖
//!            content_hash ‖ ":" ‖ signed_at RFC 3339 )
//!
//! Binding the record's content hash into the digest is what makes a
//! signature die with the record version it signed: mutate the record and
//! `verify()` returns false, permanently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use ebrx_contracts::{
    audit::{ActionKind, EntityType, EventDraft, Severity, Snapshot},
    error::{ComplianceError, ComplianceResult},
    signature::{ElectronicSignature, SignatureId, SignatureRequest},
};
use ebrx_ledger::{content_hash, AuditLedger};

use crate::{keys::SigningKeypair, policy::SigningPolicy};

/// Issues and verifies electronic signatures bound to record content hashes.
pub struct SignatureService {
    ledger: Arc<AuditLedger>,
    policy: Box<dyn SigningPolicy>,
    keypair: SigningKeypair,
    /// Every signature ever issued, by id. Signatures are immutable; this is
    /// a lookup registry, not mutable state.
    issued: Mutex<HashMap<SignatureId, ElectronicSignature>>,
}

impl SignatureService {
    pub fn new(
        ledger: Arc<AuditLedger>,
        policy: Box<dyn SigningPolicy>,
        keypair: SigningKeypair,
    ) -> Self {
        Self {
            ledger,
            policy,
            keypair,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a signature over the current content of a record.
    ///
    /// `current_content` is the record as the system holds it right now;
    /// its hash must equal the hash the caller declared in the request.
    /// A mismatch means the caller is looking at a stale version — stale
    /// content is never signed.
    ///
    /// # Errors
    ///
    /// - `Validation` — empty credential, missing reason for a meaning that
    ///   requires justification, or a stale declared content hash.
    /// - `Authorization` — the signer's role lacks the capability for the
    ///   declared meaning.
    /// - `Integrity` — the ledger refused the audit append; no signature is
    ///   issued in that case.
    pub fn sign<T: Serialize>(
        &self,
        request: SignatureRequest,
        current_content: &T,
    ) -> ComplianceResult<ElectronicSignature> {
        if request.credential.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: "signing requires credential re-entry; credential token is empty"
                    .to_string(),
            });
        }

        if request.meaning.requires_reason() && request.reason.trim().is_empty() {
            return Err(ComplianceError::Validation {
                reason: format!(
                    "signing with meaning '{}' requires a written justification",
                    request.meaning
                ),
            });
        }

        let current_hash = content_hash(current_content);
        if current_hash != request.content_hash {
            warn!(
                record_id = %request.record_id,
                declared = %request.content_hash,
                current = %current_hash,
                "refusing to sign stale record content"
            );
            return Err(ComplianceError::Validation {
                reason: format!(
                    "declared content hash does not match the current content of '{}'; \
                     the record changed since it was read",
                    request.record_id
                ),
            });
        }

        self.policy.authorize(&request.signer, request.meaning)?;

        let signature_id = SignatureId::new();
        let signed_at = Utc::now();
        let digest = signing_digest(
            &request.signer.user_id,
            &request.record_id,
            request.meaning,
            &request.content_hash,
            &signed_at.to_rfc3339(),
        );

        let signature = ElectronicSignature {
            signature_id,
            record_id: request.record_id.clone(),
            signer: request.signer.clone(),
            meaning: request.meaning,
            reason: request.reason.clone(),
            signed_at,
            content_hash: request.content_hash.clone(),
            signature_value: self.keypair.sign_digest(&digest),
        };

        // Audit append first: if the ledger refuses, the signature is
        // dropped and the caller gets the ledger's error.
        let draft = EventDraft {
            actor: request.signer,
            action: ActionKind::ElectronicSignature,
            entity_type: EntityType::Signature,
            entity_id: request.record_id,
            old_value: None,
            new_value: Some(Snapshot::Signature {
                signature_id,
                meaning: request.meaning,
                record_id: signature.record_id.clone(),
            }),
            reason: if request.reason.trim().is_empty() {
                None
            } else {
                Some(request.reason)
            },
            severity: Severity::Info,
        };
        let event = self.ledger.append(draft)?;

        info!(
            signature_id = %signature_id,
            record_id = %signature.record_id,
            meaning = %signature.meaning,
            audit_sequence = event.sequence,
            "electronic signature issued"
        );

        self.issued
            .lock()
            .expect("signature registry lock poisoned")
            .insert(signature_id, signature.clone());

        Ok(signature)
    }

    /// Check whether `signature` is still valid for the record's current
    /// content.
    ///
    /// Returns false when the content has changed since signing (the hash no
    /// longer matches) or when the stored signature value fails the Ed25519
    /// check.
    pub fn verify<T: Serialize>(
        &self,
        signature: &ElectronicSignature,
        current_content: &T,
    ) -> bool {
        if content_hash(current_content) != signature.content_hash {
            return false;
        }

        let digest = signing_digest(
            &signature.signer.user_id,
            &signature.record_id,
            signature.meaning,
            &signature.content_hash,
            &signature.signed_at.to_rfc3339(),
        );
        self.keypair.verify_digest(&digest, &signature.signature_value)
    }

    /// Look up a previously issued signature.
    pub fn get(&self, signature_id: SignatureId) -> Option<ElectronicSignature> {
        self.issued
            .lock()
            .expect("signature registry lock poisoned")
            .get(&signature_id)
            .cloned()
    }
}

/// The canonical signing digest: SHA-256 over the colon-joined signing
/// string. Every component is already deterministic, so the digest is too.
fn signing_digest(
    signer_id: &str,
    record_id: &str,
    meaning: ebrx_contracts::signature::SigningMeaning,
    content_hash: &str,
    signed_at_rfc3339: &str,
) -> Vec<u8> {
    let signing_string =
        format!("{signer_id}:{record_id}:{meaning}:{content_hash}:{signed_at_rfc3339}");
    let mut hasher = Sha256::new();
    hasher.update(signing_string.as_bytes());
    hasher.finalize().to_vec()
}
