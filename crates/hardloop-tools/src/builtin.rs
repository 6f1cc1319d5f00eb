//! Builtin forge / slither verifiers and the registry the presets resolve
//! against.

use std::sync::Arc;

use hardloop_core::pipeline::{
    ATTACK_SLOT, VERIFIER_ANALYZE, VERIFIER_COMPILE, VERIFIER_FUZZ_DEEP, VERIFIER_FUZZ_SHALLOW,
    VERIFIER_TEST,
};
use hardloop_core::{PipelineConfig, Verifier};
use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::harness::{fuzz_harness, harness_name};
use crate::runner::ShellVerifier;

/// Fuzz runs for the shallow pass.
pub const SHALLOW_FUZZ_RUNS: u32 = 1000;

/// Fuzz runs for the deep pass.
pub const DEEP_FUZZ_RUNS: u32 = 10_000;

/// Builtin verifiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinVerifier {
    /// forge build over the workspace
    Compile,

    /// forge test --json on the attack script
    AttackTest,

    /// slither --json on the artifact
    Analyze,

    /// forge fuzz run against harness 1
    FuzzShallow,

    /// forge fuzz run against harness 2
    FuzzDeep,
}

impl BuiltinVerifier {
    pub const ALL: [BuiltinVerifier; 5] = [
        BuiltinVerifier::Compile,
        BuiltinVerifier::AttackTest,
        BuiltinVerifier::Analyze,
        BuiltinVerifier::FuzzShallow,
        BuiltinVerifier::FuzzDeep,
    ];

    /// Registry name phases refer to.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinVerifier::Compile => VERIFIER_COMPILE,
            BuiltinVerifier::AttackTest => VERIFIER_TEST,
            BuiltinVerifier::Analyze => VERIFIER_ANALYZE,
            BuiltinVerifier::FuzzShallow => VERIFIER_FUZZ_SHALLOW,
            BuiltinVerifier::FuzzDeep => VERIFIER_FUZZ_DEEP,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }

    /// Shell script run in the sandbox.
    pub fn script(&self, sandbox: &SandboxConfig) -> String {
        match self {
            BuiltinVerifier::Compile => "forge build --force --contracts {dir}".to_string(),
            BuiltinVerifier::AttackTest => {
                format!("forge test --json --contracts {{dir}} --match-path {{dir}}/{ATTACK_SLOT}")
            }
            BuiltinVerifier::Analyze => format!(
                "solc-select use {} >/dev/null && slither {{dir}}/{{artifact}} --json -",
                sandbox.solc_version
            ),
            BuiltinVerifier::FuzzShallow => fuzz_script(1, SHALLOW_FUZZ_RUNS),
            BuiltinVerifier::FuzzDeep => fuzz_script(2, DEEP_FUZZ_RUNS),
        }
    }

    /// Fixed files written with every call.
    pub fn fixtures(&self, sandbox: &SandboxConfig) -> Vec<hardloop_core::AuxFile> {
        match self {
            BuiltinVerifier::FuzzShallow => vec![fuzz_harness(&sandbox.artifact_name, 1)],
            BuiltinVerifier::FuzzDeep => vec![fuzz_harness(&sandbox.artifact_name, 2)],
            _ => Vec::new(),
        }
    }

    pub fn verifier(&self, sandbox: &SandboxConfig) -> ShellVerifier {
        self.fixtures(sandbox).into_iter().fold(
            ShellVerifier::new(self.name(), self.script(sandbox), sandbox),
            ShellVerifier::with_fixture,
        )
    }
}

fn fuzz_script(iteration: u32, runs: u32) -> String {
    format!(
        "forge test --json --fuzz-runs {runs} --contracts {{dir}} --match-path {{dir}}/{}",
        harness_name(iteration)
    )
}

/// Builtin verifiers for every name `pipeline` references. Names without a
/// builtin are left out; the orchestrator rejects them as unknown.
pub fn registry(sandbox: &SandboxConfig, pipeline: &PipelineConfig) -> Vec<Arc<dyn Verifier>> {
    pipeline
        .verifier_names()
        .into_iter()
        .filter_map(BuiltinVerifier::from_name)
        .map(|builtin| Arc::new(builtin.verifier(sandbox)) as Arc<dyn Verifier>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for builtin in BuiltinVerifier::ALL {
            assert_eq!(BuiltinVerifier::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(BuiltinVerifier::from_name("mythril"), None);
    }

    #[test]
    fn test_scripts() {
        let sandbox = SandboxConfig::default();
        assert_eq!(
            BuiltinVerifier::AttackTest.script(&sandbox),
            "forge test --json --contracts {dir} --match-path {dir}/Exploit.t.sol"
        );
        assert!(BuiltinVerifier::Analyze
            .script(&sandbox)
            .starts_with("solc-select use 0.8.20"));
        assert!(BuiltinVerifier::FuzzShallow
            .script(&sandbox)
            .contains("--fuzz-runs 1000 "));
        assert!(BuiltinVerifier::FuzzDeep
            .script(&sandbox)
            .ends_with("{dir}/FuzzTest2.t.sol"));
    }

    #[test]
    fn test_fuzz_verifiers_carry_harness() {
        let sandbox = SandboxConfig {
            artifact_name: "Vault.sol".to_string(),
            ..SandboxConfig::default()
        };
        let verifier = BuiltinVerifier::FuzzDeep.verifier(&sandbox);
        assert_eq!(verifier.fixtures().len(), 1);
        assert_eq!(verifier.fixtures()[0].name, "FuzzTest2.t.sol");
        assert!(verifier.fixtures()[0].content.contains("new Vault()"));
        assert!(BuiltinVerifier::Compile.verifier(&sandbox).fixtures().is_empty());
    }

    #[test]
    fn test_registry_covers_presets() {
        let sandbox = SandboxConfig::default();

        let adversarial = PipelineConfig::adversarial();
        let mut names: Vec<_> = registry(&sandbox, &adversarial)
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["analyze", "compile", "test"]);

        let scan = PipelineConfig::scan_and_fuzz();
        assert_eq!(
            registry(&sandbox, &scan).len(),
            scan.verifier_names().len()
        );
    }
}
