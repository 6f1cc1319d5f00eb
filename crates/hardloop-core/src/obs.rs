//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for phase invocations, routing decisions and
//!   terminal outcomes
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it regardless of message text.

use tracing::{info, warn};

use crate::domain::{Outcome, PhaseId};
use crate::pipeline::Disposition;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("3f2a...");
/// // every event below carries run_id = "3f2a..."
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("hardloop.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: run started on an artifact at the given entry phase.
pub fn emit_run_started(run_id: &str, artifact: &str, entry: &PhaseId) {
    info!(event = "run.started", run_id = %run_id, artifact = %artifact, entry = %entry);
}

/// Emit event: a phase is about to be invoked.
pub fn emit_phase_started(phase: &PhaseId, kind: &str, step: u32, round: u32) {
    info!(
        event = "phase.started",
        phase = %phase,
        kind = kind,
        step = step,
        round = round,
    );
}

/// Emit event: a phase produced a verdict.
pub fn emit_phase_verdict(phase: &PhaseId, outcome: Outcome, summary: &str, unclassified: bool) {
    if unclassified {
        warn!(
            event = "phase.verdict",
            phase = %phase,
            outcome = %outcome,
            summary = %summary,
            unclassified = true,
        );
    } else {
        info!(
            event = "phase.verdict",
            phase = %phase,
            outcome = %outcome,
            summary = %summary,
        );
    }
}

/// Emit event: routing decision taken after a verdict.
pub fn emit_route_taken(phase: &PhaseId, outcome: Outcome, next: &str) {
    info!(event = "route.taken", phase = %phase, outcome = %outcome, next = %next);
}

/// Emit event: a repair was dispatched to a patch phase.
pub fn emit_repair_dispatched(requested_by: &PhaseId, patch_phase: &PhaseId, attempt: u32) {
    info!(
        event = "repair.dispatched",
        requested_by = %requested_by,
        patch_phase = %patch_phase,
        attempt = attempt,
    );
}

/// Emit event: a retry budget ran out (warning level).
pub fn emit_budget_exhausted(phase: &PhaseId, count: u32, ceiling: u32) {
    warn!(
        event = "budget.exhausted",
        phase = %phase,
        count = count,
        ceiling = ceiling,
    );
}

/// Emit event: run cancelled between phases (warning level).
pub fn emit_run_cancelled(run_id: &str, step: u32) {
    warn!(event = "run.cancelled", run_id = %run_id, step = step);
}

/// Emit event: run finished with its disposition.
pub fn emit_run_finished(
    run_id: &str,
    disposition: Disposition,
    reason: &dyn std::fmt::Display,
    round: u32,
    steps: u32,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        disposition = %disposition,
        reason = %reason,
        round = round,
        steps = steps,
    );
}
