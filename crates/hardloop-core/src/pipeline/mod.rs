//! Pipeline definition and execution.
//!
//! - [`config`]: phases, routing table, validation
//! - [`presets`]: builtin adversarial and scan-and-fuzz pipelines
//! - [`state`]: per-run mutable state and transitions
//! - [`orchestrator`]: the state machine driving a run

pub mod config;
pub mod orchestrator;
pub mod presets;
pub mod state;

pub use config::{
    Disposition, PhaseConfig, PhaseKind, PipelineConfig, Route, Routes, DEFAULT_MAX_ROUNDS,
    DEFAULT_MAX_STEPS,
};
pub use orchestrator::{run_pipeline, CancelHandle, Orchestrator};
pub use presets::{
    ATTACK_SLOT, VERIFIER_ANALYZE, VERIFIER_COMPILE, VERIFIER_FUZZ_DEEP, VERIFIER_FUZZ_SHALLOW,
    VERIFIER_TEST,
};
pub use state::{Next, RepairRequest, RunState, Transition};
