//! Scripted collaborators (testing only)
//!
//! `ScriptedVerifier` and `ScriptedGenerator` replay queued responses in
//! order and record every request they receive, so orchestrator scenarios
//! run deterministically without subprocesses or network access.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gate::{ToolOutput, Verifier, VerifyRequest};
use crate::repair::{GenerationRequest, Generator};

// ---------------------------------------------------------------------------
// ScriptedVerifier
// ---------------------------------------------------------------------------

/// Verifier replaying queued outputs; falls back to a repeated output (if
/// set) once the queue is drained, otherwise errors.
#[derive(Debug)]
pub struct ScriptedVerifier {
    name: String,
    script: Mutex<VecDeque<std::result::Result<ToolOutput, String>>>,
    fallback: Option<ToolOutput>,
    calls: Mutex<Vec<VerifyRequest>>,
}

impl ScriptedVerifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one raw output.
    pub fn then(self, raw: impl Into<String>, exit_code: i32) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(ToolOutput::new(raw, exit_code)));
        self
    }

    /// Queue one invocation failure (spawn error, timeout).
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Err(message.into()));
        self
    }

    /// Output returned for every call after the queue is drained.
    pub fn always(mut self, raw: impl Into<String>, exit_code: i32) -> Self {
        self.fallback = Some(ToolOutput::new(raw, exit_code));
        self
    }

    pub fn calls(&self) -> Vec<VerifyRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(&self, request: &VerifyRequest) -> anyhow::Result<ToolOutput> {
        self.calls.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("script for verifier {} exhausted", self.name)),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Generator replaying queued answers; same fallback rules as
/// [`ScriptedVerifier`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, text: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn always(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("generator script exhausted")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Artifact;
    use crate::repair::GenerationTask;

    fn request() -> VerifyRequest {
        VerifyRequest {
            artifact: Artifact::new("Target.sol", "contract T {}"),
            auxiliary: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_verifier_replays_in_order_then_falls_back() {
        let verifier = ScriptedVerifier::new("compile")
            .then("first", 1)
            .then_error("spawn failed")
            .always("steady", 0);

        assert_eq!(verifier.verify(&request()).await.unwrap().raw, "first");
        assert!(verifier.verify(&request()).await.is_err());
        assert_eq!(verifier.verify(&request()).await.unwrap().raw, "steady");
        assert_eq!(verifier.verify(&request()).await.unwrap().raw, "steady");
        assert_eq!(verifier.call_count(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let verifier = ScriptedVerifier::new("test");
        assert!(verifier.verify(&request()).await.is_err());

        let generator = ScriptedGenerator::new();
        let req = GenerationRequest::new(
            GenerationTask::Attack,
            Artifact::new("Target.sol", "contract T {}"),
            1,
        );
        assert!(generator.generate(&req).await.is_err());
        assert_eq!(generator.calls()[0].task, GenerationTask::Attack);
    }
}
