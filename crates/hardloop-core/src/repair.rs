//! Repair phase: generator seam and output normalization.
//!
//! The generator is opaque. The core hands it an immutable snapshot of the
//! artifact plus the diagnostic of the failing gate, strips markup fences
//! from the answer and turns it into a new artifact version.

use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{Artifact, AuxFile};

/// What the generator is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    /// An auxiliary attack script targeting the artifact.
    Attack,
    /// A revised artifact that resolves the diagnostic.
    Patch,
}

impl fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationTask::Attack => write!(f, "attack"),
            GenerationTask::Patch => write!(f, "patch"),
        }
    }
}

/// Prompt-shaped request handed to a [`Generator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task: GenerationTask,

    /// Snapshot of the artifact under test.
    pub artifact: Artifact,

    /// Diagnostic of the gate that triggered this request. For attacks this
    /// is the reconnaissance report, for patches the failure evidence.
    pub diagnostic: Option<String>,

    /// Auxiliary inputs, e.g. the attack script that compromised the artifact.
    pub auxiliary: Vec<AuxFile>,

    /// Why the previous output for this task was rejected, if it was.
    pub feedback: Option<String>,

    /// Current repair round (starts at 1).
    pub round: u32,
}

impl GenerationRequest {
    pub fn new(task: GenerationTask, artifact: Artifact, round: u32) -> Self {
        Self {
            task,
            artifact,
            diagnostic: None,
            auxiliary: Vec::new(),
            feedback: None,
            round,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn with_auxiliary(mut self, auxiliary: Vec<AuxFile>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback;
        self
    }
}

/// External content generator (attack scripts, patches).
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce source text for `request`. Stateless across calls.
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String>;
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n(.*?)```").expect("static pattern")
    })
}

/// Return the body of the first fenced code block, or the trimmed input
/// when there is none.
pub fn strip_code_fences(text: &str) -> String {
    match fence_re().captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Normalize generator output; `None` when nothing usable remains.
pub fn normalize_output(text: &str) -> Option<String> {
    let code = strip_code_fences(text);
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}
