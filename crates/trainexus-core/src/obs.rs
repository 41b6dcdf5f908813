//! Structured lifecycle events.
//!
//! Every event is an `info!` (or `warn!`) line with an `event` field so log
//! pipelines can filter on it:
//! `simulation.started`, `simulation.finished`, `evaluation.finished`,
//! `version.created`, `baseline.recorded`, `regression.finished`.

use tracing::{info, warn};

/// Span tagging everything inside one simulation run.
///
/// Attach with `Instrument::instrument`; an entered guard must not be held
/// across the run's await points.
pub fn simulation_span(run_id: &str, tag: &str, version: u32) -> tracing::Span {
    tracing::info_span!("trainexus.simulation", run_id = %run_id, tag = %tag, version)
}

pub fn emit_simulation_started(run_id: &str, tag: &str, version: u32, max_turns: u32) {
    info!(
        event = "simulation.started",
        run_id = %run_id,
        tag = %tag,
        version,
        max_turns,
    );
}

pub fn emit_simulation_finished(
    run_id: &str,
    termination: &str,
    turns: usize,
    retries: u32,
    duration_ms: u64,
) {
    info!(
        event = "simulation.finished",
        run_id = %run_id,
        termination = %termination,
        turns,
        retries,
        duration_ms,
    );
}

/// A transient agent failure that will be retried.
pub fn emit_agent_retry(speaker: &str, attempt: u32, delay_ms: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "agent.retry",
        speaker = %speaker,
        attempt,
        delay_ms,
        error = %error,
    );
}

pub fn emit_evaluation_finished(
    tag: &str,
    version: u32,
    verdict: &str,
    aggregate_score: Option<f64>,
    inconclusive: usize,
) {
    info!(
        event = "evaluation.finished",
        tag = %tag,
        version,
        verdict = %verdict,
        aggregate_score = aggregate_score.unwrap_or(f64::NAN),
        inconclusive,
    );
}

pub fn emit_version_created(tag: &str, version: u32, digest: &str, author: &str) {
    info!(
        event = "version.created",
        tag = %tag,
        version,
        digest = %digest,
        author = %author,
    );
}

pub fn emit_baseline_recorded(tag: &str, version: u32, verdict: &str, batch_id: &str) {
    info!(
        event = "baseline.recorded",
        tag = %tag,
        version,
        verdict = %verdict,
        batch_id = %batch_id,
    );
}

pub fn emit_regression_finished(
    batch_id: &str,
    rows: usize,
    passed: usize,
    failed: usize,
    execution_errors: usize,
) {
    info!(
        event = "regression.finished",
        batch_id = %batch_id,
        rows,
        passed,
        failed,
        execution_errors,
    );
}

/// Non-fatal problem while finishing a batch (e.g. baseline write failed).
pub fn emit_regression_warning(batch_id: &str, tag: &str, error: &dyn std::fmt::Display) {
    warn!(event = "regression.warning", batch_id = %batch_id, tag = %tag, error = %error);
}
