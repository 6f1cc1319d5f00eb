//! Concrete collaborators for the hardloop pipeline.
//!
//! - [`runner`]: workspace materialization and sandboxed subprocess verifiers
//! - [`builtin`]: forge / slither verifiers named by the builtin presets
//! - [`harness`]: fuzz harness template
//! - [`generator`]: OpenAI-compatible chat completion generator
//! - [`config`]: `hardloop.toml` and environment overrides

pub mod builtin;
pub mod config;
pub mod error;
pub mod generator;
pub mod harness;
pub mod prompt;
pub mod runner;

pub use builtin::{registry, BuiltinVerifier};
pub use config::{GeneratorConfig, HardloopConfig, PipelineSection, SandboxConfig};
pub use error::{Result, ToolsError};
pub use generator::{ChatGenerator, ChatMessage};
pub use harness::fuzz_harness;
pub use runner::{run_command, ShellVerifier, Workspace};
