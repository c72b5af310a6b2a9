//! Signing-role policy: which roles may sign with which meanings.
//!
//! Rules are declared in TOML and evaluated in declaration order — the first
//! rule whose `role` and `meaning` patterns match wins. If no rule matches,
//! the policy denies: a role can only sign with a meaning it was explicitly
//! granted.
//!
//! Example policy:
//!
//! ```toml
//! [[rules]]
//! id = "qa-release"
//! description = "Only QA managers may approve batch release"
//! role = "qa-manager"
//! meaning = "release-approval"
//! permit = true
//!
//! [[rules]]
//! id = "operators-perform"
//! description = "Operators sign the steps they perform"
//! role = "manufacturing-operator"
//! meaning = "performed"
//! permit = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ebrx_contracts::{
    actor::Actor,
    error::{ComplianceError, ComplianceResult},
    signature::SigningMeaning,
};

/// The authorization gate consulted before any signature is issued.
///
/// Implementations are trusted and must be deterministic.
pub trait SigningPolicy: Send + Sync {
    /// Return `Ok(())` when `signer` may sign with `meaning`, or
    /// `Err(Authorization)` naming the missing capability otherwise.
    fn authorize(&self, signer: &Actor, meaning: SigningMeaning) -> ComplianceResult<()>;
}

/// A single signing rule loaded from TOML.
///
/// Both `role` and `meaning` support the special wildcard value `"*"`,
/// which matches any string. `meaning` uses the kebab-case wire names
/// (`"release-approval"`, `"deviation-closure"`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRule {
    /// Stable identifier used in logs and error messages.
    pub id: String,

    /// Human-readable explanation of what this rule controls.
    pub description: String,

    /// The role pattern to match against the signer's role.
    pub role: String,

    /// The signing-meaning pattern to match against the declared meaning.
    pub meaning: String,

    /// Whether a match grants or refuses the capability.
    pub permit: bool,
}

impl SigningRule {
    /// Matching logic: `"*"` matches anything, otherwise exact
    /// (case-sensitive) comparison.
    pub fn matches(&self, role: &str, meaning: SigningMeaning) -> bool {
        let role_matches = self.role == "*" || self.role == role;
        let meaning_matches = self.meaning == "*" || self.meaning == meaning.as_str();
        role_matches && meaning_matches
    }
}

/// The top-level structure deserialized from a TOML signing-policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningPolicyConfig {
    /// Ordered list of rules. First match wins.
    pub rules: Vec<SigningRule>,
}

/// A `SigningPolicy` implementation that reads rules from a TOML document.
#[derive(Debug)]
pub struct TomlSigningPolicy {
    config: SigningPolicyConfig,
}

impl TomlSigningPolicy {
    /// Parse `s` as TOML and build a policy.
    ///
    /// Returns `ComplianceError::Config` if the TOML is malformed or does
    /// not match the expected `SigningPolicyConfig` schema.
    pub fn from_toml_str(s: &str) -> ComplianceResult<Self> {
        let config: SigningPolicyConfig =
            toml::from_str(s).map_err(|e| ComplianceError::Config {
                reason: format!("failed to parse signing policy TOML: {e}"),
            })?;
        Ok(Self { config })
    }

    /// Read the file at `path` and parse it as TOML signing policy.
    pub fn from_file(path: &Path) -> ComplianceResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ComplianceError::Config {
            reason: format!("failed to read signing policy file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }
}

impl SigningPolicy for TomlSigningPolicy {
    /// Evaluate rules in declaration order; the first match decides. No
    /// match means the capability was never granted — deny.
    fn authorize(&self, signer: &Actor, meaning: SigningMeaning) -> ComplianceResult<()> {
        let role = signer.role.as_str();

        for rule in &self.config.rules {
            if !rule.matches(role, meaning) {
                continue;
            }

            debug!(
                rule_id = %rule.id,
                signer = %signer.user_id,
                role,
                meaning = %meaning,
                permit = rule.permit,
                "signing rule matched"
            );

            if rule.permit {
                return Ok(());
            }
            return Err(ComplianceError::Authorization {
                actor: signer.user_id.clone(),
                role: role.to_string(),
                action: format!("sign with meaning '{meaning}' (refused by rule '{}')", rule.id),
            });
        }

        warn!(
            signer = %signer.user_id,
            role,
            meaning = %meaning,
            "no signing rule matched; denying by default"
        );

        Err(ComplianceError::Authorization {
            actor: signer.user_id.clone(),
            role: role.to_string(),
            action: format!("sign with meaning '{meaning}'"),
        })
    }
}
