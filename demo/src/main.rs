//! EBRX Compliance Core — Demo CLI
//!
//! Runs one or all of the demo scenarios against a real compliance core
//! (hash-chained ledger, signature service, deviation manager, batch state
//! machine, reporter) with mock manufacturing data.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- lifecycle
//!   cargo run -p demo -- rejected-batch
//!   cargo run -p demo -- blocked-attempts

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ebrx_contracts::{
    actor::{Actor, Role},
    audit::EntityType,
    batch::{BatchDraft, BatchState, ProcessStep, ProductType, TransitionEvidence},
    deviation::DeviationSeverity,
    error::ComplianceResult,
    report::TimeRange,
    signature::{ElectronicSignature, SignatureRequest, SigningMeaning},
};
use ebrx_core::{ComplianceCore, CoreConfig};

// ── Site signing policy ───────────────────────────────────────────────────────

const SITE_POLICY: &str = include_str!("../policies/signing.toml");

// ── CLI definition ────────────────────────────────────────────────────────────

/// EBRX — batch-record compliance core demo.
///
/// Each subcommand drives the real components end to end: every action lands
/// on the SHA-256 hash chain before any state changes, signatures are bound
/// to record content hashes, and the run finishes with chain verification
/// and a compliance report.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "EBRX compliance core demo",
    long_about = "Runs EBRX demo scenarios showing the hash-chained audit ledger,\n\
                  content-bound electronic signatures, deviation gating, and the\n\
                  batch lifecycle state machine."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all three scenarios in sequence.
    RunAll,
    /// Scenario 1: full B-100 lifecycle Draft → Released with a Major
    /// deviation detour.
    Lifecycle,
    /// Scenario 2: QA rejection of a contaminated batch (deviation stays
    /// open, closed out-of-band).
    RejectedBatch,
    /// Scenario 3: blocked transitions, stale signatures, and the forensic
    /// trail they leave.
    BlockedAttempts,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialize structured logging. Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::Lifecycle => run_lifecycle(),
        Command::RejectedBatch => run_rejected_batch(),
        Command::BlockedAttempts => run_blocked_attempts(),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {e}");
            std::process::exit(1);
        }
    }
}

fn run_all() -> ComplianceResult<()> {
    run_lifecycle()?;
    run_rejected_batch()?;
    run_blocked_attempts()?;
    Ok(())
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn build_core() -> ComplianceResult<ComplianceCore> {
    ComplianceCore::new(CoreConfig {
        signing_policy_toml: SITE_POLICY.to_string(),
        ..CoreConfig::default()
    })
}

fn operator() -> Actor {
    Actor::new("USR-014", "Dana Okafor", Role::new("manufacturing-operator"))
}

fn qc_analyst() -> Actor {
    Actor::new("USR-207", "Priya Shah", Role::new("qc-analyst"))
}

fn qa_manager() -> Actor {
    Actor::new("USR-503", "Marcus Webb", Role::new("qa-manager"))
}

fn mab_batch(batch_id: &str) -> BatchDraft {
    BatchDraft {
        batch_id: batch_id.to_string(),
        product: ProductType::MonoclonalAntibody,
        product_name: "mAb-A".to_string(),
        target_yield: 50.0,
        steps: vec![
            ProcessStep::new(1, "Inoculation", "SOP-INOC-001-v3", true),
            ProcessStep::new(2, "Cell Culture", "SOP-CULTURE-001-v7", true),
            ProcessStep::new(3, "Harvest", "SOP-HARV-002-v1", true),
        ],
    }
}

fn sign(
    core: &ComplianceCore,
    record_id: &str,
    signer: Actor,
    meaning: SigningMeaning,
    reason: &str,
) -> ComplianceResult<ElectronicSignature> {
    let content_hash = core.current_content_hash(record_id)?;
    core.request_signature(SignatureRequest {
        record_id: record_id.to_string(),
        content_hash,
        signer,
        meaning,
        reason: reason.to_string(),
        credential: "demo-otp-482915".to_string(),
    })
}

fn perform_step(core: &ComplianceCore, batch_id: &str, step_number: u32) -> ComplianceResult<()> {
    let signature = sign(core, batch_id, operator(), SigningMeaning::Performed, "")?;
    core.record_step(batch_id, step_number, &operator(), Some(&signature))?;
    Ok(())
}

fn transition(
    core: &ComplianceCore,
    batch_id: &str,
    target: BatchState,
    evidence: &TransitionEvidence,
    actor: &Actor,
) -> ComplianceResult<()> {
    let version = core.get_batch(batch_id)?.version;
    let record = core.request_transition(batch_id, target, version, evidence, actor)?;
    println!("  -> {batch_id} is now '{}' (version {})", record.state, record.version);
    Ok(())
}

fn print_report(core: &ComplianceCore, window_start: chrono::DateTime<Utc>) {
    let report = core.get_compliance_report(&TimeRange::new(
        window_start,
        Utc::now() + chrono::Duration::seconds(1),
    ));
    println!();
    println!("  Compliance report:");
    println!("    events in window ........ {}", report.total_events);
    println!("    ledger intact ........... {}", report.ledger_intact);
    println!("    rejected attempts ....... {}", report.rejected_transition_attempts);
    for (meaning, count) in &report.signature_counts {
        println!("    signatures '{meaning}' ... {count}");
    }
    for entry in &report.batches {
        println!(
            "    batch {} ......... state '{}', open deviations {}, ALCOA+ {}",
            entry.batch_id,
            entry.state,
            entry.open_deviations,
            if entry.alcoa.compliant() { "pass" } else { "FAIL" }
        );
        for issue in &entry.alcoa.issues {
            println!("      issue: {issue}");
        }
    }
}

// ── Scenario 1: full lifecycle ────────────────────────────────────────────────

fn run_lifecycle() -> ComplianceResult<()> {
    println!("Scenario 1: B-100 lifecycle Draft -> Released");
    println!("---------------------------------------------");
    let core = build_core()?;
    let window_start = Utc::now();

    core.start_batch(mab_batch("B-100"), &operator())?;
    println!("  batch B-100 opened in 'Draft'");

    perform_step(&core, "B-100", 1)?;
    transition(&core, "B-100", BatchState::InProgress, &TransitionEvidence::none(), &operator())?;

    perform_step(&core, "B-100", 2)?;
    perform_step(&core, "B-100", 3)?;
    core.record_yield("B-100", 48.7, &operator())?;
    transition(&core, "B-100", BatchState::QcReview, &TransitionEvidence::none(), &operator())?;

    // A Major deviation surfaces during QC review and blocks QA review
    // until investigated and closed.
    let deviation = core.open_deviation(
        "B-100",
        "Temperature excursion to 39.1C for 12 minutes during cell culture",
        DeviationSeverity::Major,
        &operator(),
    )?;
    println!("  Major deviation {} opened", deviation.deviation_id);

    let qc_signature = sign(&core, "B-100", qc_analyst(), SigningMeaning::Reviewed, "")?;
    let blocked = core.request_transition(
        "B-100",
        BatchState::QaReview,
        core.get_batch("B-100")?.version,
        &TransitionEvidence::signed(qc_signature),
        &qc_analyst(),
    );
    match blocked {
        Err(e) => println!("  QA review blocked as expected: {e}"),
        Ok(_) => println!("  unexpected: QA review proceeded with an open Major deviation"),
    }

    core.attach_investigation(
        deviation.deviation_id,
        "Temporary HVAC fluctuation; culture temperature never left validated hold range",
        "CAPA-2024-017",
        &qa_manager(),
    )?;
    let closure = sign(
        &core,
        &deviation.deviation_id.to_string(),
        qa_manager(),
        SigningMeaning::DeviationClosure,
        "investigation reviewed, no product impact",
    )?;
    core.close_deviation(deviation.deviation_id, &closure, &qa_manager())?;
    println!("  deviation investigated and closed under QA signature");

    let qc_signature = sign(&core, "B-100", qc_analyst(), SigningMeaning::Reviewed, "")?;
    transition(
        &core,
        "B-100",
        BatchState::QaReview,
        &TransitionEvidence::signed(qc_signature),
        &qc_analyst(),
    )?;

    let qa_signature = sign(
        &core,
        "B-100",
        qa_manager(),
        SigningMeaning::ReleaseApproval,
        "all quality tests passed",
    )?;
    transition(
        &core,
        "B-100",
        BatchState::Released,
        &TransitionEvidence::signed(qa_signature),
        &qa_manager(),
    )?;

    core.verify_ledger()?;
    println!(
        "  audit chain verified: {} events, head hash {}",
        core.ledger_len(),
        &core.ledger_head_hash()[..16]
    );

    print_report(&core, window_start);
    println!();
    Ok(())
}

// ── Scenario 2: rejection path ────────────────────────────────────────────────

fn run_rejected_batch() -> ComplianceResult<()> {
    println!("Scenario 2: B-200 rejected with an open deviation");
    println!("-------------------------------------------------");
    let core = build_core()?;
    let window_start = Utc::now();

    core.start_batch(mab_batch("B-200"), &operator())?;
    perform_step(&core, "B-200", 1)?;
    transition(&core, "B-200", BatchState::InProgress, &TransitionEvidence::none(), &operator())?;
    perform_step(&core, "B-200", 2)?;
    perform_step(&core, "B-200", 3)?;
    transition(&core, "B-200", BatchState::QcReview, &TransitionEvidence::none(), &operator())?;

    let qc_signature = sign(&core, "B-200", qc_analyst(), SigningMeaning::Reviewed, "")?;
    transition(
        &core,
        "B-200",
        BatchState::QaReview,
        &TransitionEvidence::signed(qc_signature),
        &qc_analyst(),
    )?;

    // Contamination confirmed during QA review.
    let deviation = core.open_deviation(
        "B-200",
        "Bioburden result above action limit in two consecutive samples",
        DeviationSeverity::Major,
        &qc_analyst(),
    )?;
    println!("  Major deviation {} opened during QA review", deviation.deviation_id);

    // Rejection is reachable with the deviation still open; it is closed
    // out-of-band afterwards.
    let rejection = sign(
        &core,
        "B-200",
        qa_manager(),
        SigningMeaning::Rejection,
        "contamination confirmed; batch cannot be released",
    )?;
    transition(
        &core,
        "B-200",
        BatchState::Rejected,
        &TransitionEvidence::signed_with_reason(
            rejection,
            "contamination confirmed; batch cannot be released",
        ),
        &qa_manager(),
    )?;

    println!(
        "  open deviations after rejection: {} (closed out-of-band)",
        core.deviations_for_batch("B-200").iter().filter(|d| d.is_open()).count()
    );

    core.verify_ledger()?;
    print_report(&core, window_start);
    println!();
    Ok(())
}

// ── Scenario 3: blocked attempts ──────────────────────────────────────────────

fn run_blocked_attempts() -> ComplianceResult<()> {
    println!("Scenario 3: blocked transitions leave a forensic trail");
    println!("------------------------------------------------------");
    let core = build_core()?;
    let window_start = Utc::now();

    core.start_batch(mab_batch("B-300"), &operator())?;

    // Draft -> Released is not in the lifecycle table.
    let attempt = core.request_transition(
        "B-300",
        BatchState::Released,
        0,
        &TransitionEvidence::none(),
        &operator(),
    );
    if let Err(e) = attempt {
        println!("  attempt 1 refused: {e}");
    }

    // Draft -> In Progress without the inoculation step recorded.
    let attempt = core.request_transition(
        "B-300",
        BatchState::InProgress,
        0,
        &TransitionEvidence::none(),
        &operator(),
    );
    if let Err(e) = attempt {
        println!("  attempt 2 refused: {e}");
    }

    // An operator asking for a release-approval signature is refused by the
    // signing policy before anything is recorded.
    let content_hash = core.current_content_hash("B-300")?;
    let attempt = core.request_signature(SignatureRequest {
        record_id: "B-300".to_string(),
        content_hash,
        signer: operator(),
        meaning: SigningMeaning::ReleaseApproval,
        reason: "please".to_string(),
        credential: "demo-otp-482915".to_string(),
    });
    if let Err(e) = attempt {
        println!("  attempt 3 refused: {e}");
    }

    // A signature from before a record change is dead evidence.
    let stale = sign(&core, "B-300", qc_analyst(), SigningMeaning::Reviewed, "")?;
    perform_step(&core, "B-300", 1)?;
    println!(
        "  stale QC signature verifies after step recording: {}",
        core.verify_signature(&stale)?
    );

    let trail = core.get_entity_trail(EntityType::Batch, "B-300");
    println!("  forensic events on B-300's trail: {}", trail.len());

    core.verify_ledger()?;
    print_report(&core, window_start);
    println!();
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("EBRX — Batch Record Compliance Core");
    println!("Demo scenarios");
    println!("===================================");
    println!();
    println!("Every accepted action follows the same pipeline:");
    println!("  [1] Validate the request against current record state");
    println!("  [2] Verify evidence: content-bound signatures, deviation status");
    println!("  [3] Append immutable event(s) to the SHA-256 audit chain");
    println!("  [4] Only then mutate the in-memory record");
    println!();
}
