//! Builtin pipeline definitions.

use crate::gate::{Aggregation, ParseMode};
use crate::parse::Impact;

use super::config::{Disposition, PhaseConfig, PipelineConfig, Route};

/// Registry names the builtin pipelines expect.
pub const VERIFIER_COMPILE: &str = "compile";
pub const VERIFIER_TEST: &str = "test";
pub const VERIFIER_ANALYZE: &str = "analyze";
pub const VERIFIER_FUZZ_SHALLOW: &str = "fuzz-shallow";
pub const VERIFIER_FUZZ_DEEP: &str = "fuzz-deep";

/// Slot the generated attack script is stored under.
pub const ATTACK_SLOT: &str = "Exploit.t.sol";

impl PipelineConfig {
    /// Red team / blue team loop.
    ///
    /// ```text
    /// validate -> recon -> generate-attack -> check-attack -> execute
    ///                ^                                          | compromised
    ///                +---- check-patch <---- generate-patch <---+
    /// ```
    ///
    /// `execute` resisting the attack ends the run `SAFE`.
    pub fn adversarial() -> Self {
        let safe = Route::terminal(Disposition::Safe);
        let inconclusive = Route::terminal(Disposition::Inconclusive);

        PipelineConfig::new(
            "validate",
            vec![
                PhaseConfig::verify("validate", VERIFIER_COMPILE, ParseMode::Compile)
                    .initial_gate()
                    .on_pass(Route::goto("recon"))
                    .on_fail(inconclusive)
                    .on_tool_error(Route::retry("validate")),
                PhaseConfig::verify("recon", VERIFIER_ANALYZE, ParseMode::findings(Impact::Low))
                    .on_pass(Route::goto("generate-attack"))
                    .on_fail(Route::goto("generate-attack"))
                    .on_tool_error(Route::retry("recon")),
                PhaseConfig::generate("generate-attack", ATTACK_SLOT)
                    .with_context_from("recon")
                    .on_pass(Route::goto("check-attack"))
                    .on_fail(Route::retry("generate-attack"))
                    .on_tool_error(Route::retry("generate-attack")),
                PhaseConfig::verify("check-attack", VERIFIER_COMPILE, ParseMode::Compile)
                    .including(&[ATTACK_SLOT])
                    .on_pass(Route::goto("execute"))
                    .on_fail(Route::retry("generate-attack"))
                    .on_tool_error(Route::retry("generate-attack")),
                PhaseConfig::verify(
                    "execute",
                    VERIFIER_TEST,
                    ParseMode::test_results(Aggregation::AnySuccess),
                )
                .including(&[ATTACK_SLOT])
                .compromise()
                .on_pass(Route::repair("generate-patch"))
                .on_fail(safe)
                .on_tool_error(Route::retry("generate-attack")),
                PhaseConfig::patch("generate-patch")
                    .resets_on_pass(&["recon", "generate-attack"])
                    .on_pass(Route::goto("check-patch"))
                    .on_fail(Route::retry("generate-patch"))
                    .on_tool_error(Route::retry("generate-patch")),
                PhaseConfig::verify("check-patch", VERIFIER_COMPILE, ParseMode::Compile)
                    .on_pass(Route::goto("recon"))
                    .on_fail(Route::repair("generate-patch"))
                    .on_tool_error(Route::retry("check-patch")),
            ],
        )
    }

    /// Static scan followed by two fuzzing passes of increasing depth; any
    /// failing check is repaired in place and then re-run.
    pub fn scan_and_fuzz() -> Self {
        let regression = ParseMode::test_results(Aggregation::AllSuccess);

        PipelineConfig::new(
            "static",
            vec![
                PhaseConfig::verify("static", VERIFIER_ANALYZE, ParseMode::findings(Impact::Medium))
                    .on_pass(Route::goto("fuzz-1"))
                    .on_fail(Route::repair("fix"))
                    .on_tool_error(Route::retry("static")),
                PhaseConfig::verify("fuzz-1", VERIFIER_FUZZ_SHALLOW, regression.clone())
                    .compromise()
                    .on_pass(Route::goto("fuzz-2"))
                    .on_fail(Route::repair("fix"))
                    .on_tool_error(Route::retry("fuzz-1")),
                PhaseConfig::verify("fuzz-2", VERIFIER_FUZZ_DEEP, regression)
                    .compromise()
                    .on_pass(Route::terminal(Disposition::Safe))
                    .on_fail(Route::repair("fix"))
                    .on_tool_error(Route::retry("fuzz-2")),
                PhaseConfig::patch("fix")
                    .on_pass(Route::goto("check-fix"))
                    .on_fail(Route::retry("fix"))
                    .on_tool_error(Route::retry("fix")),
                PhaseConfig::verify("check-fix", VERIFIER_COMPILE, ParseMode::Compile)
                    .on_pass(Route::Return)
                    .on_fail(Route::repair("fix"))
                    .on_tool_error(Route::retry("check-fix")),
            ],
        )
    }

    /// Look up a builtin pipeline by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "adversarial" => Some(Self::adversarial()),
            "scan_and_fuzz" | "scan-and-fuzz" => Some(Self::scan_and_fuzz()),
            _ => None,
        }
    }
}
