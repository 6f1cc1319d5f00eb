//! Mutable state of one pipeline invocation.
//!
//! Owned exclusively by the orchestrator; verifiers and generators only
//! ever see cloned snapshots of the artifact and auxiliary files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::budget::RetryBudget;
use crate::domain::{Artifact, AuxFile, Outcome, PhaseId, Verdict};

use super::config::{Disposition, Route};

/// An open request to repair the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    /// Phase whose failure asked for this repair.
    pub requested_by: PhaseId,
    /// Phase that first failed in the current repair chain; `Route::Return`
    /// goes back here.
    pub return_to: PhaseId,
    /// Evidence handed to the patch generator.
    pub diagnostic: String,
}

/// Where a transition led.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Next {
    Phase(PhaseId),
    Terminal(Disposition),
}

/// One routing decision. Carries no timestamps so identical tool responses
/// yield identical transition sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// 1-based phase invocation counter.
    pub step: u32,
    pub phase: PhaseId,
    pub outcome: Outcome,
    /// Configured route consulted; `None` when a run-level rule overrode it
    /// (fatal input, unclassifiable output).
    pub route: Option<Route>,
    pub next: Next,
}

/// State of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub artifact: Artifact,
    pub current: PhaseId,
    /// Starts at 1; incremented each time a patch phase yields a new artifact.
    pub round: u32,
    /// Phase invocations so far.
    pub steps: u32,
    /// Repair requests dispatched.
    pub repairs: u32,
    pub budget: RetryBudget,
    pub last_verdicts: BTreeMap<PhaseId, Verdict>,
    pub trail: Vec<Verdict>,
    pub transitions: Vec<Transition>,
    pub auxiliary: BTreeMap<String, AuxFile>,
    pub pending_repair: Option<RepairRequest>,
    /// Rejection reasons waiting for the next invocation of a phase.
    pub feedback: BTreeMap<PhaseId, String>,
}

impl RunState {
    pub fn new(artifact: Artifact, entry: PhaseId, budget: RetryBudget) -> Self {
        Self {
            artifact,
            current: entry,
            round: 1,
            steps: 0,
            repairs: 0,
            budget,
            last_verdicts: BTreeMap::new(),
            trail: Vec::new(),
            transitions: Vec::new(),
            auxiliary: BTreeMap::new(),
            pending_repair: None,
            feedback: BTreeMap::new(),
        }
    }

    pub fn record_verdict(&mut self, verdict: Verdict) {
        self.last_verdicts
            .insert(verdict.phase.clone(), verdict.clone());
        self.trail.push(verdict);
    }

    /// Store or replace an auxiliary file.
    pub fn put_auxiliary(&mut self, file: AuxFile) {
        self.auxiliary.insert(file.name.clone(), file);
    }

    /// Snapshot of the named auxiliary files that currently exist, in the
    /// order requested.
    pub fn auxiliary_named(&self, names: &[String]) -> Vec<AuxFile> {
        names
            .iter()
            .filter_map(|name| self.auxiliary.get(name).cloned())
            .collect()
    }

    pub fn all_auxiliary(&self) -> Vec<AuxFile> {
        self.auxiliary.values().cloned().collect()
    }

    /// Diagnostic of the most recent verdict of `phase`, if non-empty.
    pub fn diagnostic_of(&self, phase: &PhaseId) -> Option<String> {
        self.last_verdicts
            .get(phase)
            .map(|v| v.diagnostic.clone())
            .filter(|d| !d.is_empty())
    }

    /// Open a repair to be carried out by the patch phase `with`.
    ///
    /// An already pending repair keeps its return target and its original
    /// evidence, so a chain of failed patches still returns to the first
    /// failure. The newer complaint (typically the rejected patch's compiler
    /// errors) becomes feedback for the next patch attempt.
    pub fn open_repair(&mut self, requested_by: &PhaseId, with: &PhaseId, diagnostic: String) {
        match &mut self.pending_repair {
            Some(pending) => {
                pending.requested_by = requested_by.clone();
                self.feedback.insert(with.clone(), diagnostic);
            }
            None => {
                self.pending_repair = Some(RepairRequest {
                    requested_by: requested_by.clone(),
                    return_to: requested_by.clone(),
                    diagnostic,
                });
            }
        }
        self.repairs += 1;
    }
}
