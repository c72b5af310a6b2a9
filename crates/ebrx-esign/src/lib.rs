//! # ebrx-esign
//!
//! Electronic signature service for the EBRX compliance core (Part 11
//! subpart C).
//!
//! ## Overview
//!
//! A signature binds a signer, a declared meaning, and the content hash of
//! the exact record version being signed. Issuance is gated by a TOML-driven
//! signing-role policy (deny-by-default, first match wins) and atomically
//! paired with one `ELECTRONIC_SIGNATURE` audit event. Verification fails —
//! it does not warn — the moment the signed record's content changes.

pub mod keys;
pub mod policy;
pub mod service;

pub use keys::SigningKeypair;
pub use policy::{SigningPolicy, SigningPolicyConfig, SigningRule, TomlSigningPolicy};
pub use service::SignatureService;

// ── Tests ─────────────────────────────────────────────────────────────────────
