//! The phase state machine.
//!
//! One phase runs at a time. After each verdict the orchestrator consults
//! the phase's routing table, charges retry budgets before any repair or
//! regeneration is dispatched, and stops on the first terminal decision.
//! Once a run starts it always yields a [`RunReport`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Artifact, AuxFile, Outcome, PhaseId, Verdict};
use crate::error::{PipelineError, Result};
use crate::gate::{truncate_tail, PhaseGate, Verifier, VerifyRequest};
use crate::obs::{
    emit_budget_exhausted, emit_phase_started, emit_phase_verdict, emit_repair_dispatched,
    emit_route_taken, emit_run_cancelled, emit_run_finished, emit_run_started, RunSpan,
};
use crate::repair::{normalize_output, GenerationRequest, GenerationTask, Generator};
use crate::report::{RunReport, TerminalOutcome, TerminalReason};

use super::config::{Disposition, PhaseConfig, PhaseKind, PipelineConfig, Route};
use super::state::{Next, RunState, Transition};

/// Marks runs terminal between phases. Cloneable across tasks.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stop the current run (and any later run of the same orchestrator)
    /// before its next phase.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

enum Step {
    Continue(PhaseId),
    Stop(TerminalOutcome),
}

/// Drives one pipeline definition against registered collaborators.
pub struct Orchestrator {
    config: PipelineConfig,
    verifiers: BTreeMap<String, Arc<dyn Verifier>>,
    generator: Option<Arc<dyn Generator>>,
    gate: PhaseGate,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    /// Validate `config` and bind collaborators. Every verifier a phase
    /// names must be registered, and a generator is required as soon as a
    /// generate or patch phase exists.
    pub fn new(
        config: PipelineConfig,
        verifiers: Vec<Arc<dyn Verifier>>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut registry: BTreeMap<String, Arc<dyn Verifier>> = BTreeMap::new();
        for verifier in verifiers {
            let name = verifier.name().to_string();
            if registry.insert(name.clone(), verifier).is_some() {
                return Err(PipelineError::InvalidConfig(format!(
                    "verifier {name} registered twice"
                )));
            }
        }

        for phase in &config.phases {
            if let PhaseKind::Verify { verifier, .. } = &phase.kind {
                if !registry.contains_key(verifier) {
                    return Err(PipelineError::UnknownVerifier {
                        phase: phase.id.to_string(),
                        verifier: verifier.clone(),
                    });
                }
            }
        }

        if config.needs_generator() && generator.is_none() {
            return Err(PipelineError::MissingGenerator);
        }

        let (tx, rx) = watch::channel(false);
        Ok(Self {
            gate: PhaseGate::new(config.max_diagnostic_chars),
            config,
            verifiers: registry,
            generator,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Run the pipeline on `initial` until a terminal decision.
    pub async fn run(&self, initial: Artifact) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let _span = RunSpan::enter(&run_id);
        emit_run_started(&run_id, &initial.name, &self.config.entry);

        let mut state = RunState::new(initial, self.config.entry.clone(), self.config.budget());

        let outcome = loop {
            if *self.cancel_rx.borrow() {
                emit_run_cancelled(&run_id, state.steps);
                break TerminalOutcome::new(Disposition::Inconclusive, TerminalReason::Cancelled);
            }
            if state.steps >= self.config.max_steps {
                break TerminalOutcome::new(
                    Disposition::Inconclusive,
                    TerminalReason::StepLimit {
                        steps: self.config.max_steps,
                    },
                );
            }
            let Some(phase) = self.config.phase(&state.current) else {
                break TerminalOutcome::new(
                    Disposition::Inconclusive,
                    TerminalReason::UnknownPhase {
                        phase: state.current.clone(),
                    },
                );
            };

            state.steps += 1;
            emit_phase_started(&phase.id, phase.kind.label(), state.steps, state.round);

            let verdict = self.invoke(phase, &mut state).await;
            emit_phase_verdict(
                &verdict.phase,
                verdict.outcome,
                &verdict.summary,
                verdict.unclassified,
            );

            let step = self.route(phase, &verdict, &mut state);
            state.record_verdict(verdict);

            match step {
                Step::Continue(next) => state.current = next,
                Step::Stop(outcome) => break outcome,
            }
        };

        emit_run_finished(
            &run_id,
            outcome.disposition,
            &outcome.reason,
            state.round,
            state.steps,
        );
        RunReport::from_state(run_id, state, outcome)
    }

    // -----------------------------------------------------------------------
    // Phase invocation
    // -----------------------------------------------------------------------

    async fn invoke(&self, phase: &PhaseConfig, state: &mut RunState) -> Verdict {
        let feedback = state.feedback.remove(&phase.id);

        match &phase.kind {
            PhaseKind::Verify {
                verifier,
                parse,
                include,
            } => {
                let Some(verifier) = self.verifiers.get(verifier) else {
                    return Verdict::tool_error(
                        &phase.id,
                        format!("verifier {verifier} is not registered"),
                    );
                };
                let request = VerifyRequest {
                    artifact: state.artifact.clone(),
                    auxiliary: state.auxiliary_named(include),
                };
                self.gate
                    .run(&phase.id, parse, verifier.as_ref(), request)
                    .await
            }
            PhaseKind::Generate { slot, context_from } => {
                let mut request = GenerationRequest::new(
                    GenerationTask::Attack,
                    state.artifact.clone(),
                    state.round,
                )
                .with_feedback(feedback);
                if let Some(context) = context_from.as_ref().and_then(|p| state.diagnostic_of(p)) {
                    request = request.with_diagnostic(context);
                }

                match self.generate(&phase.id, &request).await {
                    Ok(code) => {
                        let summary = format!("generated {slot} ({} bytes)", code.len());
                        state.put_auxiliary(AuxFile::new(slot.clone(), code));
                        Verdict::pass(&phase.id, summary)
                    }
                    Err(verdict) => verdict,
                }
            }
            PhaseKind::Patch => {
                let mut request = GenerationRequest::new(
                    GenerationTask::Patch,
                    state.artifact.clone(),
                    state.round,
                )
                .with_auxiliary(state.all_auxiliary())
                .with_feedback(feedback);
                if let Some(pending) = &state.pending_repair {
                    request = request.with_diagnostic(pending.diagnostic.clone());
                }

                match self.generate(&phase.id, &request).await {
                    Ok(code) => {
                        state.artifact = state.artifact.revise(code);
                        state.round += 1;
                        debug!(
                            version = state.artifact.version,
                            digest = %state.artifact.digest,
                            "artifact revised"
                        );
                        Verdict::pass(
                            &phase.id,
                            format!("artifact revised to version {}", state.artifact.version),
                        )
                    }
                    Err(verdict) => verdict,
                }
            }
        }
    }

    /// Call the generator and normalize its answer; failures come back as
    /// tool-error verdicts.
    async fn generate(
        &self,
        phase: &PhaseId,
        request: &GenerationRequest,
    ) -> std::result::Result<String, Verdict> {
        let Some(generator) = &self.generator else {
            return Err(Verdict::tool_error(phase, "no generator configured"));
        };

        match generator.generate(request).await {
            Ok(text) => normalize_output(&text).ok_or_else(|| {
                Verdict::tool_error(phase, format!("generator returned no {} code", request.task))
            }),
            Err(e) => Err(Verdict::tool_error(phase, format!("{} generation failed", request.task))
                .with_diagnostic(truncate_tail(
                    &format!("{e:#}"),
                    self.config.max_diagnostic_chars,
                ))),
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn route(&self, phase: &PhaseConfig, verdict: &Verdict, state: &mut RunState) -> Step {
        let (route, step) = self.resolve(phase, verdict, state);

        let next = match &step {
            Step::Continue(p) => Next::Phase(p.clone()),
            Step::Stop(outcome) => Next::Terminal(outcome.disposition),
        };
        let label = match &next {
            Next::Phase(p) => p.to_string(),
            Next::Terminal(d) => d.to_string(),
        };
        emit_route_taken(&phase.id, verdict.outcome, &label);

        state.transitions.push(Transition {
            step: state.steps,
            phase: phase.id.clone(),
            outcome: verdict.outcome,
            route,
            next,
        });
        step
    }

    fn resolve(
        &self,
        phase: &PhaseConfig,
        verdict: &Verdict,
        state: &mut RunState,
    ) -> (Option<Route>, Step) {
        if verdict.unclassified {
            return (
                None,
                Step::Stop(TerminalOutcome::new(
                    Disposition::Inconclusive,
                    TerminalReason::Unclassifiable {
                        phase: phase.id.clone(),
                    },
                )),
            );
        }

        if phase.initial_gate && verdict.outcome == Outcome::Fail && state.artifact.is_initial() {
            return (
                None,
                Step::Stop(TerminalOutcome::new(
                    Disposition::Fatal,
                    TerminalReason::FatalInput {
                        phase: phase.id.clone(),
                    },
                )),
            );
        }

        let route = phase.routes.for_outcome(verdict.outcome).clone();
        let step = match &route {
            Route::Goto { phase: next } => Step::Continue(next.clone()),
            Route::Terminal { disposition } => Step::Stop(TerminalOutcome::new(
                *disposition,
                TerminalReason::Route {
                    phase: phase.id.clone(),
                    outcome: verdict.outcome,
                },
            )),
            Route::Repair { with } => self.dispatch_repair(phase, with, verdict, state),
            Route::Retry { from } => self.dispatch_retry(from, verdict, state),
            Route::Return => match &state.pending_repair {
                Some(pending) => Step::Continue(pending.return_to.clone()),
                None => Step::Stop(TerminalOutcome::new(
                    Disposition::Inconclusive,
                    TerminalReason::NoReturnTarget {
                        phase: phase.id.clone(),
                    },
                )),
            },
        };

        if verdict.outcome == Outcome::Pass {
            for key in &phase.resets_on_pass {
                state.budget.reset(key);
            }
            // A passing check closes the repair chain it was verifying.
            let closes_repair = matches!(phase.kind, PhaseKind::Verify { .. })
                && !matches!(route, Route::Repair { .. });
            if closes_repair {
                state.pending_repair = None;
            }
        }

        (Some(route), step)
    }

    fn dispatch_repair(
        &self,
        phase: &PhaseConfig,
        with: &PhaseId,
        verdict: &Verdict,
        state: &mut RunState,
    ) -> Step {
        let unresolved = if phase.compromise {
            Disposition::Unsafe
        } else {
            Disposition::Inconclusive
        };

        let attempts = state.budget.increment(&phase.id);
        if state.budget.exhausted(&phase.id) {
            emit_budget_exhausted(&phase.id, attempts, state.budget.ceiling(&phase.id));
            return Step::Stop(TerminalOutcome::new(
                unresolved,
                TerminalReason::BudgetExhausted {
                    phase: phase.id.clone(),
                    attempts,
                },
            ));
        }

        // Compromised artifacts stay repairable until their own budget runs out.
        if !phase.compromise && state.round >= self.config.max_rounds {
            return Step::Stop(TerminalOutcome::new(
                unresolved,
                TerminalReason::RoundLimit {
                    rounds: self.config.max_rounds,
                },
            ));
        }

        state.open_repair(&phase.id, with, evidence(verdict));
        emit_repair_dispatched(&phase.id, with, attempts);
        Step::Continue(with.clone())
    }

    fn dispatch_retry(&self, from: &PhaseId, verdict: &Verdict, state: &mut RunState) -> Step {
        let attempts = state.budget.increment(from);
        if state.budget.exhausted(from) {
            emit_budget_exhausted(from, attempts, state.budget.ceiling(from));
            return Step::Stop(TerminalOutcome::new(
                Disposition::Inconclusive,
                TerminalReason::BudgetExhausted {
                    phase: from.clone(),
                    attempts,
                },
            ));
        }

        state.feedback.insert(from.clone(), evidence(verdict));
        debug!(phase = %from, attempt = attempts, "retry dispatched");
        Step::Continue(from.clone())
    }
}

fn evidence(verdict: &Verdict) -> String {
    if verdict.diagnostic.is_empty() {
        verdict.summary.clone()
    } else {
        format!("{}\n{}", verdict.summary, verdict.diagnostic)
    }
}

/// Validate `config`, bind collaborators and run once.
pub async fn run_pipeline(
    initial: Artifact,
    config: PipelineConfig,
    verifiers: Vec<Arc<dyn Verifier>>,
    generator: Option<Arc<dyn Generator>>,
) -> Result<RunReport> {
    let orchestrator = Orchestrator::new(config, verifiers, generator)?;
    Ok(orchestrator.run(initial).await)
}
