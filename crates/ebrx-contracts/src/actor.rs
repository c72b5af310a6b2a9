//! Actor identity and role types.
//!
//! A verified actor identity arrives pre-validated from the authentication
//! layer; these types carry it through audit events and signatures. EBRX does
//! not authenticate anyone — it records who did what.

use serde::{Deserialize, Serialize};

/// A named role held by an actor.
///
/// Role names should be kebab-case and descriptive:
/// e.g. "manufacturing-operator", "qc-analyst", "qa-manager".
/// Signing-policy rules match on the role string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role(pub String);

impl Role {
    /// Construct a role from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The verified identity performing an action.
///
/// Every mutating audit event must carry a non-empty `user_id` — this is the
/// Attributable principle, enforced at the ledger boundary rather than by
/// convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user identifier (e.g. "USR-014").
    pub user_id: String,
    /// Human-readable display name.
    pub user_name: String,
    /// The role the actor held when performing the action.
    pub role: Role,
}

impl Actor {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            role,
        }
    }

    /// The reserved identity for actions taken by the platform itself
    /// (e.g. scheduled integrity sweeps).
    pub fn system() -> Self {
        Self::new("system", "System", Role::new("system"))
    }
}
