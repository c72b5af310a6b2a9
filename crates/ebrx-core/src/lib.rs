//! # ebrx-core
//!
//! Facade for the EBRX compliance core: one `ComplianceCore` instance owns
//! the audit ledger, signature service, deviation manager, batch state
//! machine, and compliance reporter, and exposes the ingest boundary that
//! external collaborators (API layer, sensor ingestion, ML inference)
//! forward to.

pub mod core;

pub use core::{ComplianceCore, CoreConfig};

// ── Tests ─────────────────────────────────────────────────────────────────────
