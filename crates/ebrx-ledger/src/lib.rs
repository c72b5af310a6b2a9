//! # ebrx-ledger
//!
//! Immutable, append-only, SHA-256 hash-chained audit ledger — the integrity
//! root of the EBRX compliance core.
//!
//! ## Overview
//!
//! Every accepted domain action in the system resolves to one or more
//! `AuditEvent`s appended here. Each event links to the previous event via
//! its SHA-256 hash; tampering with any committed byte breaks the chain and
//! is detected by `verify_range` at exactly the altered index, after which
//! the ledger refuses further appends until the hold is cleared by an
//! explicit, itself-audited administrative action.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ebrx_ledger::{AuditLedger, LedgerConfig, EventFilter};
//!
//! let ledger = AuditLedger::new(LedgerConfig::default());
//! let event = ledger.append(draft)?;
//! ledger.verify()?;
//! let trail = ledger.entity_trail(EntityType::Batch, "B-100");
//! ```

pub mod chain;
pub mod event;
pub mod ledger;

pub use chain::{content_hash, hash_event, verify_chain, ChainViolation};
pub use event::AuditEvent;
pub use ledger::{AuditLedger, EventFilter, LedgerConfig};

// ── Tests ─────────────────────────────────────────────────────────────────────
