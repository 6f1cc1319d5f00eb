//! hardloop core library
//!
//! Phase-gated verification and repair of a single source artifact. A run
//! alternates generated attacks and patches with verifier checkpoints
//! (compiler, dynamic tests, static analysis) under bounded retries and
//! ends SAFE, UNSAFE, INCONCLUSIVE or FATAL.

pub mod budget;
pub mod digest;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod localize;
pub mod obs;
pub mod parse;
pub mod pipeline;
pub mod repair;
pub mod report;
pub mod telemetry;

pub use budget::{BudgetEntry, RetryBudget, DEFAULT_RETRY_CEILING};
pub use domain::{
    Artifact, AuxFile, Diagnostic, ItemResult, Outcome, PhaseId, Severity, Verdict,
};
pub use error::{PipelineError, Result};
pub use gate::{
    truncate_tail, Aggregation, ParseMode, PhaseGate, ToolOutput, Verifier, VerifyRequest,
    DEFAULT_MAX_DIAGNOSTIC_CHARS,
};
pub use localize::{errors_elsewhere, filter_by_artifact, path_identifies};
pub use parse::{extract_structured, parse_compiler_output, Finding, Impact};
pub use pipeline::{
    run_pipeline, CancelHandle, Disposition, Orchestrator, PhaseConfig, PhaseKind,
    PipelineConfig, Route, Routes,
};
pub use repair::{strip_code_fences, GenerationRequest, GenerationTask, Generator};
pub use report::{read_run_report, write_run_report, RunReport, TerminalOutcome, TerminalReason};
