//! Normalization of raw verifier output into structured values.
//!
//! - [`structured`]: positional-retry JSON extraction with recursive key search
//! - [`compiler`]: compiler diagnostics (JSON `errors` or text blocks)
//! - [`test_results`]: per-test results from a dynamic test runner
//! - [`findings`]: static-analysis findings and report rendering

pub mod compiler;
pub mod findings;
pub mod structured;
pub mod test_results;

pub use compiler::{parse_compiler_output, parse_text_diagnostics};
pub use findings::{format_findings_report, parse_findings, Finding, Impact};
pub use structured::{
    extract_structured, extract_structured_all, extract_structured_as, find_key, locate_structured,
    StructuredMatch,
};
pub use test_results::parse_test_results;
