//! Domain models for hardloop.
//!
//! - `Artifact` / `AuxFile`: the source under test and its companion files
//! - `Diagnostic`: normalized compiler output record
//! - `Verdict`: classified result of one phase invocation
//! - `PhaseId`: phase identity and retry-budget key

pub mod artifact;
pub mod diagnostic;
pub mod phase_id;
pub mod verdict;

pub use artifact::{Artifact, AuxFile};
pub use diagnostic::{Diagnostic, Severity};
pub use phase_id::PhaseId;
pub use verdict::{ItemResult, Outcome, Verdict};
