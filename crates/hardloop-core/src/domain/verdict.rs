//! Structured result of one phase invocation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::phase_id::PhaseId;

/// Classification the orchestrator routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    ToolError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail => write!(f, "fail"),
            Outcome::ToolError => write!(f, "tool_error"),
        }
    }
}

/// One named sub-result of a multi-case verifier (a test function, a
/// static-analysis finding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub name: String,
    pub passed: bool,
    pub reason: String,
}

impl ItemResult {
    pub fn new(name: impl Into<String>, passed: bool, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            reason: reason.into(),
        }
    }
}

/// Result of one phase invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Phase that produced this verdict.
    pub phase: PhaseId,

    pub outcome: Outcome,

    /// Short line for logs.
    pub summary: String,

    /// Payload handed to a repair or regeneration request.
    pub diagnostic: String,

    /// Ordered per-case results (empty for single-shot verifiers).
    pub items: Vec<ItemResult>,

    /// Set when no structured payload was found and the process exited
    /// cleanly; the orchestrator must stop rather than loop on it.
    pub unclassified: bool,

    /// Exit status of the verifier process, when one ran.
    pub exit_code: Option<i32>,
}

impl Verdict {
    fn base(phase: &PhaseId, outcome: Outcome, summary: impl Into<String>) -> Self {
        Self {
            phase: phase.clone(),
            outcome,
            summary: summary.into(),
            diagnostic: String::new(),
            items: Vec::new(),
            unclassified: false,
            exit_code: None,
        }
    }

    pub fn pass(phase: &PhaseId, summary: impl Into<String>) -> Self {
        Self::base(phase, Outcome::Pass, summary)
    }

    pub fn fail(phase: &PhaseId, summary: impl Into<String>) -> Self {
        Self::base(phase, Outcome::Fail, summary)
    }

    pub fn tool_error(phase: &PhaseId, summary: impl Into<String>) -> Self {
        Self::base(phase, Outcome::ToolError, summary)
    }

    /// Fail carrying raw text that could not be classified.
    pub fn unclassified(phase: &PhaseId, raw: impl Into<String>) -> Self {
        let mut verdict = Self::base(phase, Outcome::Fail, "no structured payload in tool output");
        verdict.diagnostic = raw.into();
        verdict.unclassified = true;
        verdict
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }

    pub fn with_items(mut self, items: Vec<ItemResult>) -> Self {
        self.items = items;
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn passed_count(&self) -> usize {
        self.items.iter().filter(|i| i.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| !i.passed).count()
    }
}
