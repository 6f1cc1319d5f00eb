//! Run reports and their on-disk form.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetEntry;
use crate::digest::sha256_hex;
use crate::domain::{Artifact, Outcome, PhaseId, Verdict};
use crate::error::{PipelineError, Result};
use crate::pipeline::{Disposition, RunState, Transition};

/// Why the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalReason {
    /// A configured terminal route was taken.
    Route { phase: PhaseId, outcome: Outcome },
    /// The untouched input failed an initial gate.
    FatalInput { phase: PhaseId },
    /// A retry budget ran out.
    BudgetExhausted { phase: PhaseId, attempts: u32 },
    /// Repair rounds cap reached.
    RoundLimit { rounds: u32 },
    /// Phase invocation cap reached.
    StepLimit { steps: u32 },
    /// A verifier produced output that could not be classified.
    Unclassifiable { phase: PhaseId },
    /// A return route fired with no repair pending.
    NoReturnTarget { phase: PhaseId },
    /// Control reached a phase the pipeline does not define.
    UnknownPhase { phase: PhaseId },
    Cancelled,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Route { phase, outcome } => {
                write!(f, "{phase} returned {outcome}")
            }
            TerminalReason::FatalInput { phase } => {
                write!(f, "initial artifact failed {phase}")
            }
            TerminalReason::BudgetExhausted { phase, attempts } => {
                write!(f, "retry budget of {phase} exhausted after {attempts} attempt(s)")
            }
            TerminalReason::RoundLimit { rounds } => write!(f, "round limit of {rounds} reached"),
            TerminalReason::StepLimit { steps } => write!(f, "step limit of {steps} reached"),
            TerminalReason::Unclassifiable { phase } => {
                write!(f, "output of {phase} could not be classified")
            }
            TerminalReason::NoReturnTarget { phase } => {
                write!(f, "{phase} routed to return with no repair pending")
            }
            TerminalReason::UnknownPhase { phase } => write!(f, "phase {phase} is not defined"),
            TerminalReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Final disposition plus its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutcome {
    pub disposition: Disposition,
    pub reason: TerminalReason,
}

impl TerminalOutcome {
    pub fn new(disposition: Disposition, reason: TerminalReason) -> Self {
        Self {
            disposition,
            reason,
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.disposition, self.reason)
    }
}

/// Everything a finished run yields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub final_artifact: Artifact,
    pub outcome: TerminalOutcome,
    pub round: u32,
    pub repairs: u32,
    pub steps: u32,
    /// Every verdict in invocation order.
    pub verdicts: Vec<Verdict>,
    pub transitions: Vec<Transition>,
    pub budget: BTreeMap<PhaseId, BudgetEntry>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn from_state(run_id: impl Into<String>, state: RunState, outcome: TerminalOutcome) -> Self {
        Self {
            run_id: run_id.into(),
            budget: state.budget.entries(),
            final_artifact: state.artifact,
            outcome,
            round: state.round,
            repairs: state.repairs,
            steps: state.steps,
            verdicts: state.trail,
            transitions: state.transitions,
            finished_at: Utc::now(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        self.outcome.disposition
    }

    /// Most recent verdict of `phase`.
    pub fn last_verdict(&self, phase: &PhaseId) -> Option<&Verdict> {
        self.verdicts.iter().rev().find(|v| &v.phase == phase)
    }

    /// Diagnostic of the last verdict, the most useful single line of evidence.
    pub fn final_diagnostic(&self) -> Option<&str> {
        self.verdicts
            .last()
            .map(|v| v.diagnostic.as_str())
            .filter(|d| !d.is_empty())
    }

    /// Phases visited, in order.
    pub fn phase_sequence(&self) -> Vec<&str> {
        self.transitions.iter().map(|t| t.phase.as_str()).collect()
    }
}

/// Persist `<dir>/<run_id>/report.json` and `<dir>/<run_id>/report.digest`.
pub fn write_run_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&report.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let report_path = run_dir.join("report.json");
    let digest_path = run_dir.join("report.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = sha256_hex(&json);

    std::fs::write(&report_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(report_path)
}

/// Read `<dir>/<run_id>/report.json`, verifying it against its digest.
pub fn read_run_report(run_id: &str, dir: &Path) -> Result<RunReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("report.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("report.digest"))?;

    let actual = sha256_hex(&json);
    if digest.trim() != actual {
        return Err(PipelineError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
