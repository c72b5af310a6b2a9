//! Audit event taxonomies and the draft type submitted to the ledger.
//!
//! The action, severity, and entity taxonomies are closed enums: an event
//! outside them cannot be constructed, which is what the reporter's
//! "Original" check relies on. Value snapshots are a tagged variant per
//! entity type with explicit fields — the ledger rejects a draft whose
//! snapshot does not match its declared entity type, so payloads cannot
//! drift across events of the same kind.

use serde::{Deserialize, Serialize};

use crate::{
    actor::Actor,
    batch::BatchState,
    deviation::{DeviationSeverity, DeviationStatus},
    signature::{SignatureId, SigningMeaning},
};

/// What an audit event records having happened.
///
/// Serialized with the regulatory wire names (`ELECTRONIC_SIGNATURE` etc.)
/// so persisted records read the way inspectors expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Create,
    Read,
    Update,
    Delete,
    Approve,
    Reject,
    ElectronicSignature,
}

impl ActionKind {
    /// Actions that must carry a free-text reason to be accepted.
    pub fn requires_reason(self) -> bool {
        matches!(self, Self::Update | Self::Approve | Self::Reject)
    }

    /// Everything except `Read` changes state somewhere.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
            Self::ElectronicSignature => "ELECTRONIC_SIGNATURE",
        };
        f.write_str(s)
    }
}

/// Severity attached to an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The closed set of entity kinds the ledger records events about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Batch,
    ProcessStep,
    Deviation,
    Signature,
    /// The ledger itself — administrative actions such as clearing an
    /// integrity hold are audited under this entity.
    Ledger,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Batch => "batch",
            Self::ProcessStep => "process_step",
            Self::Deviation => "deviation",
            Self::Signature => "signature",
            Self::Ledger => "ledger",
        };
        f.write_str(s)
    }
}

/// A point-in-time value snapshot carried in an event's `old_value` /
/// `new_value` fields.
///
/// One variant per `EntityType`, each with an explicit field set. The ledger
/// verifies variant/entity-type agreement on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Snapshot {
    Batch {
        state: BatchState,
        version: u64,
    },
    ProcessStep {
        step_number: u32,
        step_name: String,
        completed: bool,
    },
    Deviation {
        severity: DeviationSeverity,
        status: DeviationStatus,
    },
    Signature {
        signature_id: SignatureId,
        meaning: SigningMeaning,
        record_id: String,
    },
    Ledger {
        writes_suspended: bool,
    },
}

impl Snapshot {
    /// The entity type this snapshot variant belongs to.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Batch { .. } => EntityType::Batch,
            Self::ProcessStep { .. } => EntityType::ProcessStep,
            Self::Deviation { .. } => EntityType::Deviation,
            Self::Signature { .. } => EntityType::Signature,
            Self::Ledger { .. } => EntityType::Ledger,
        }
    }
}

/// What a caller submits to the ledger.
///
/// Deliberately carries no timestamp, sequence number, or hash — those are
/// assigned by the ledger at append time and can never be supplied by the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub actor: Actor,
    pub action: ActionKind,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// State before the action, when meaningful (absent on CREATE/READ).
    pub old_value: Option<Snapshot>,
    /// State after the action, when meaningful.
    pub new_value: Option<Snapshot>,
    /// Free-text justification. Mandatory for UPDATE/APPROVE/REJECT.
    pub reason: Option<String>,
    pub severity: Severity,
}

impl EventDraft {
    /// A minimal draft with no snapshots, no reason, and INFO severity.
    pub fn new(
        actor: Actor,
        action: ActionKind,
        entity_type: EntityType,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            actor,
            action,
            entity_type,
            entity_id: entity_id.into(),
            old_value: None,
            new_value: None,
            reason: None,
            severity: Severity::Info,
        }
    }
}
