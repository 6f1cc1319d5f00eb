//! Phase gate: one verifier invocation classified into a [`Verdict`].
//!
//! Classification rules per [`ParseMode`]:
//! - `ExitCode`: exit 0 passes, anything else fails.
//! - `Compile`: errors located in the artifact fail the gate; a nonzero
//!   exit whose errors all sit in other files (or cannot be located) is a
//!   tool error, so a broken companion script never charges the artifact.
//! - `TestResults` / `Findings`: structured payload aggregated per phase;
//!   without a payload, a nonzero exit is a tool error and a clean exit is
//!   an unclassified fail. A results payload naming no cases counts as no
//!   payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{Artifact, AuxFile, ItemResult, Outcome, PhaseId, Verdict};
use crate::localize::{errors_elsewhere, filter_by_artifact};
use crate::parse::{
    extract_structured, extract_structured_all, format_findings_report, parse_compiler_output,
    parse_findings, parse_test_results, Impact,
};

/// Default cap on diagnostic text forwarded to generators.
pub const DEFAULT_MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Immutable snapshot handed to a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRequest {
    pub artifact: Artifact,
    pub auxiliary: Vec<AuxFile>,
}

/// Raw verifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Combined textual output (stdout followed by stderr).
    pub raw: String,
    /// Process exit status; -1 when the process was killed by a signal.
    pub exit_code: i32,
}

impl ToolOutput {
    pub fn new(raw: impl Into<String>, exit_code: i32) -> Self {
        Self {
            raw: raw.into(),
            exit_code,
        }
    }
}

/// External checker (compiler, dynamic test runner, static analyzer).
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Registry name phases refer to.
    fn name(&self) -> &str;

    /// Run the check. Must not retain `request` beyond the call.
    async fn verify(&self, request: &VerifyRequest) -> anyhow::Result<ToolOutput>;
}

/// How sub-results of a multi-case verifier combine into one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Any successful case passes the phase (an attack needs one win).
    AnySuccess,
    /// Every case must succeed (regression / fuzz invariants).
    AllSuccess,
}

impl Aggregation {
    /// `None` for an empty result list: zero cases decide nothing.
    pub fn aggregate(self, items: &[ItemResult]) -> Option<Outcome> {
        if items.is_empty() {
            return None;
        }
        let holds = match self {
            Aggregation::AnySuccess => items.iter().any(|i| i.passed),
            Aggregation::AllSuccess => items.iter().all(|i| i.passed),
        };
        Some(if holds { Outcome::Pass } else { Outcome::Fail })
    }
}

/// Output interpretation for a verify phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ParseMode {
    ExitCode,
    Compile,
    TestResults {
        key: String,
        aggregation: Aggregation,
    },
    Findings {
        key: String,
        min_impact: Impact,
    },
}

impl ParseMode {
    /// `forge test --json` results keyed on `test_results`.
    pub fn test_results(aggregation: Aggregation) -> Self {
        ParseMode::TestResults {
            key: "test_results".to_string(),
            aggregation,
        }
    }

    /// slither `--json` detectors, ignoring findings below `min_impact`.
    pub fn findings(min_impact: Impact) -> Self {
        ParseMode::Findings {
            key: "detectors".to_string(),
            min_impact,
        }
    }
}

/// Runs a verifier and classifies its output.
#[derive(Debug, Clone, Copy)]
pub struct PhaseGate {
    max_diagnostic_chars: usize,
}

impl Default for PhaseGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIAGNOSTIC_CHARS)
    }
}

impl PhaseGate {
    pub fn new(max_diagnostic_chars: usize) -> Self {
        Self {
            max_diagnostic_chars,
        }
    }

    /// Invoke `verifier`; any error it raises becomes a tool-error verdict.
    pub async fn run(
        &self,
        phase: &PhaseId,
        parse: &ParseMode,
        verifier: &dyn Verifier,
        request: VerifyRequest,
    ) -> Verdict {
        match verifier.verify(&request).await {
            Ok(output) => {
                debug!(
                    phase = %phase,
                    verifier = verifier.name(),
                    exit_code = output.exit_code,
                    bytes = output.raw.len(),
                    "verifier returned"
                );
                self.classify(phase, parse, &request.artifact.name, &output)
            }
            Err(e) => Verdict::tool_error(
                phase,
                format!("verifier '{}' failed to run", verifier.name()),
            )
            .with_diagnostic(self.clip(&format!("{e:#}"))),
        }
    }

    /// Pure classification of one verifier output.
    pub fn classify(
        &self,
        phase: &PhaseId,
        parse: &ParseMode,
        artifact_name: &str,
        output: &ToolOutput,
    ) -> Verdict {
        let verdict = match parse {
            ParseMode::ExitCode => self.classify_exit_code(phase, output),
            ParseMode::Compile => self.classify_compile(phase, artifact_name, output),
            ParseMode::TestResults { key, aggregation } => {
                self.classify_tests(phase, key, *aggregation, output)
            }
            ParseMode::Findings { key, min_impact } => {
                self.classify_findings(phase, key, *min_impact, output)
            }
        };
        verdict.with_exit_code(output.exit_code)
    }

    fn classify_exit_code(&self, phase: &PhaseId, output: &ToolOutput) -> Verdict {
        if output.exit_code == 0 {
            Verdict::pass(phase, "exited cleanly")
        } else {
            Verdict::fail(phase, format!("exited with code {}", output.exit_code))
                .with_diagnostic(self.clip(&output.raw))
        }
    }

    fn classify_compile(&self, phase: &PhaseId, artifact_name: &str, output: &ToolOutput) -> Verdict {
        let diagnostics = parse_compiler_output(&output.raw);
        let own = filter_by_artifact(&diagnostics, artifact_name);

        if !own.is_empty() {
            return Verdict::fail(
                phase,
                format!("{} compile error(s) in {artifact_name}", own.len()),
            )
            .with_diagnostic(self.clip(&render_lines(own.iter().map(|d| d.render()))));
        }

        if output.exit_code == 0 {
            return Verdict::pass(phase, "compiled cleanly");
        }

        let elsewhere = errors_elsewhere(&diagnostics, artifact_name);
        if elsewhere.is_empty() {
            Verdict::tool_error(
                phase,
                format!(
                    "compiler exited with code {} without a localizable error",
                    output.exit_code
                ),
            )
            .with_diagnostic(self.clip(&output.raw))
        } else {
            Verdict::tool_error(
                phase,
                format!("{} compile error(s) outside {artifact_name}", elsewhere.len()),
            )
            .with_diagnostic(self.clip(&render_lines(elsewhere.iter().map(|d| d.render()))))
        }
    }

    fn classify_tests(
        &self,
        phase: &PhaseId,
        key: &str,
        aggregation: Aggregation,
        output: &ToolOutput,
    ) -> Verdict {
        // Multi-suite runs carry one results map per suite.
        let suites = extract_structured_all(&output.raw, key);
        let items: Vec<ItemResult> = suites
            .iter()
            .filter_map(parse_test_results)
            .flatten()
            .collect();
        let Some(outcome) = aggregation.aggregate(&items) else {
            return self.without_payload(phase, output);
        };

        let succeeded = items.iter().filter(|i| i.passed).count();
        let summary = format!("{succeeded}/{} case(s) succeeded", items.len());
        let report = render_lines(items.iter().map(|item| {
            if item.passed {
                format!("{}: success", item.name)
            } else {
                format!("{}: fail - {}", item.name, item.reason)
            }
        }));
        let diagnostic = format!("{report}\n\n--- tool output ---\n{}", output.raw);

        let verdict = match outcome {
            Outcome::Pass => Verdict::pass(phase, summary),
            _ => Verdict::fail(phase, summary),
        };
        verdict
            .with_items(items)
            .with_diagnostic(self.clip(&diagnostic))
    }

    fn classify_findings(
        &self,
        phase: &PhaseId,
        key: &str,
        min_impact: Impact,
        output: &ToolOutput,
    ) -> Verdict {
        let findings = extract_structured(&output.raw, key).and_then(|v| parse_findings(&v));
        let Some(findings) = findings else {
            if let Some(Value::String(error)) = extract_structured(&output.raw, "error") {
                return Verdict::tool_error(phase, "analyzer reported an error")
                    .with_diagnostic(self.clip(&error));
            }
            if extract_structured(&output.raw, "success") == Some(Value::Bool(true)) {
                return Verdict::pass(phase, "analyzer reported no findings");
            }
            return self.without_payload(phase, output);
        };

        let relevant: Vec<_> = findings
            .into_iter()
            .filter(|f| f.impact >= min_impact)
            .collect();
        if relevant.is_empty() {
            return Verdict::pass(phase, format!("no findings at or above {min_impact:?}"));
        }

        Verdict::fail(phase, format!("{} finding(s)", relevant.len()))
            .with_items(relevant.iter().map(|f| f.to_item()).collect())
            .with_diagnostic(self.clip(&format_findings_report(&relevant)))
    }

    fn without_payload(&self, phase: &PhaseId, output: &ToolOutput) -> Verdict {
        if output.exit_code != 0 {
            Verdict::tool_error(
                phase,
                format!(
                    "no structured output, exit code {}",
                    output.exit_code
                ),
            )
            .with_diagnostic(self.clip(&output.raw))
        } else {
            Verdict::unclassified(phase, self.clip(&output.raw))
        }
    }

    fn clip(&self, text: &str) -> String {
        truncate_tail(text, self.max_diagnostic_chars)
    }
}

fn render_lines(lines: impl Iterator<Item = String>) -> String {
    lines.collect::<Vec<_>>().join("\n")
}

/// Keep at most `max_chars` characters from the end of `text`.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skip = total - max_chars;
    let tail: String = text.chars().skip(skip).collect();
    format!("[... {skip} chars truncated]\n{tail}")
}
