//! End-to-end orchestrator scenarios against scripted collaborators.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use hardloop_core::fakes::{ScriptedGenerator, ScriptedVerifier};
use hardloop_core::{
    read_run_report, run_pipeline, write_run_report, Artifact, CancelHandle, Disposition,
    GenerationTask, Generator, Orchestrator, PhaseId, PipelineConfig, PipelineError,
    TerminalReason, ToolOutput, Verifier, VerifyRequest,
};
use hardloop_core::pipeline::Next;

const TARGET: &str = "Target.sol";
const SOURCE: &str = "pragma solidity ^0.8.20;\ncontract Vault {\n    mapping(address => uint256) public balances;\n}\n";
const PATCHED: &str = "pragma solidity ^0.8.20;\ncontract Vault {\n    bool private locked;\n}";

const CLEAN_BUILD: &str = "Compiling 2 files with Solc 0.8.20\nCompiler run successful!\n";
const CLEAN_SCAN: &str =
    r#"INFO:Slither: analyzed 1 contract {"success": true, "error": null, "results": {"detectors": []}}"#;
const TARGET_SYNTAX_ERROR: &str =
    "Error (2314): Expected ';' but got '}'\n  --> /app/src/Target.sol:10:5:\n   |\n10 |     }\n";
const EXPLOIT_COMPILE_ERROR: &str =
    "Error (7576): Undeclared identifier.\n  --> /app/test/Exploit.t.sol:30:9:\n   |\n";

const RISKY_SCAN: &str = r#"{"success": true, "error": null, "results": {"detectors": [{"check": "reentrancy-eth", "impact": "High", "confidence": "Medium", "description": "Reentrancy in Vault.withdraw()"}]}}"#;

const BROKEN_PATCH: &str = "pragma solidity ^0.8.20;\ncontract Vault {\n    bool private locked\n}";

const ATTACK: &str = "```solidity\ncontract ExploitTest { function testExploit() public {} }\n```";

fn attack_results(success: bool) -> String {
    let status = if success { "Success" } else { "Failure" };
    format!(
        "Ran 1 test for test/Exploit.t.sol:ExploitTest\n{{\"test/Exploit.t.sol:ExploitTest\": {{\"duration\": \"1ms\", \"test_results\": {{\"testExploit()\": {{\"status\": \"{status}\", \"reason\": null}}}}}}}}"
    )
}

fn fuzz_results(all_pass: bool) -> String {
    let second = if all_pass { "Success" } else { "Failure" };
    format!(
        r#"{{"test/Fuzz.t.sol:FuzzTest": {{"test_results": {{"testFuzz_Deposit(uint256)": {{"status": "Success"}}, "testFuzz_Withdraw(uint256)": {{"status": "{second}", "reason": "balance invariant violated"}}}}}}}}"#
    )
}

fn artifact() -> Artifact {
    Artifact::new(TARGET, SOURCE)
}

fn registry(verifiers: &[&Arc<ScriptedVerifier>]) -> Vec<Arc<dyn Verifier>> {
    verifiers
        .iter()
        .map(|v| Arc::clone(*v) as Arc<dyn Verifier>)
        .collect()
}

struct Adversarial {
    compile: Arc<ScriptedVerifier>,
    analyze: Arc<ScriptedVerifier>,
    test: Arc<ScriptedVerifier>,
    generator: Arc<ScriptedGenerator>,
}

impl Adversarial {
    fn new(
        compile: ScriptedVerifier,
        test: ScriptedVerifier,
        generator: ScriptedGenerator,
    ) -> Self {
        Self {
            compile: Arc::new(compile),
            analyze: Arc::new(ScriptedVerifier::new("analyze").always(CLEAN_SCAN, 0)),
            test: Arc::new(test),
            generator: Arc::new(generator),
        }
    }

    fn orchestrator(&self, config: PipelineConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            registry(&[&self.compile, &self.analyze, &self.test]),
            Some(Arc::clone(&self.generator) as Arc<dyn Generator>),
        )
        .expect("valid orchestrator")
    }
}

fn compromise_then_resist() -> Adversarial {
    Adversarial::new(
        ScriptedVerifier::new("compile").always(CLEAN_BUILD, 0),
        ScriptedVerifier::new("test")
            .then(attack_results(true), 0)
            .then(attack_results(false), 1),
        ScriptedGenerator::new()
            .then(ATTACK)
            .then(format!("Here is the hardened contract:\n```solidity\n{PATCHED}\n```"))
            .then(ATTACK),
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_syntax_error_in_initial_artifact_is_fatal() {
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile").always(TARGET_SYNTAX_ERROR, 1),
        ScriptedVerifier::new("test"),
        ScriptedGenerator::new(),
    );

    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Fatal);
    assert_eq!(
        report.outcome.reason,
        TerminalReason::FatalInput {
            phase: PhaseId::from("validate")
        }
    );
    assert_eq!(report.repairs, 0);
    assert_eq!(report.steps, 1);
    assert_eq!(setup.generator.call_count(), 0);
    assert!(report
        .final_diagnostic()
        .is_some_and(|d| d.contains("Target.sol:10")));
}

#[tokio::test]
async fn test_attack_script_failing_to_compile_three_times_is_inconclusive() {
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile")
            .then(CLEAN_BUILD, 0)
            .always(EXPLOIT_COMPILE_ERROR, 1),
        ScriptedVerifier::new("test"),
        ScriptedGenerator::new().always(ATTACK),
    );

    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Inconclusive);
    assert_eq!(
        report.outcome.reason,
        TerminalReason::BudgetExhausted {
            phase: PhaseId::from("generate-attack"),
            attempts: 3
        }
    );
    assert_eq!(report.final_artifact, artifact());
    assert_eq!(report.repairs, 0);
    assert_eq!(setup.generator.call_count(), 3);
    assert_eq!(setup.test.call_count(), 0);

    // Regenerations carry the compiler complaint about the script.
    let calls = setup.generator.calls();
    assert!(calls[0].feedback.is_none());
    assert!(calls[1]
        .feedback
        .as_deref()
        .is_some_and(|f| f.contains("Exploit.t.sol:30")));

    // The script reached the compiler alongside the artifact.
    let compile_calls = setup.compile.calls();
    assert!(compile_calls[0].auxiliary.is_empty());
    assert_eq!(compile_calls[1].auxiliary.len(), 1);
    assert_eq!(compile_calls[1].auxiliary[0].name, "Exploit.t.sol");
    assert!(compile_calls[1].auxiliary[0]
        .content
        .starts_with("contract ExploitTest"));
}

#[tokio::test]
async fn test_compromise_repaired_then_resisted_is_safe() {
    let setup = compromise_then_resist();

    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Safe);
    assert_eq!(report.round, 2);
    assert_eq!(report.repairs, 1);
    assert_eq!(report.final_artifact.source, PATCHED);
    assert_eq!(report.final_artifact.version, 1);
    assert_eq!(
        report.phase_sequence(),
        vec![
            "validate",
            "recon",
            "generate-attack",
            "check-attack",
            "execute",
            "generate-patch",
            "check-patch",
            "recon",
            "generate-attack",
            "check-attack",
            "execute",
        ]
    );

    let generations = setup.generator.calls();
    assert_eq!(generations.len(), 3);
    assert_eq!(generations[1].task, GenerationTask::Patch);
    assert!(generations[1]
        .diagnostic
        .as_deref()
        .is_some_and(|d| d.contains("testExploit()")));
    assert_eq!(generations[1].auxiliary[0].name, "Exploit.t.sol");
    assert_eq!(generations[2].round, 2);

    // check-patch compiled the patched artifact on its own.
    let compile_calls = setup.compile.calls();
    assert_eq!(compile_calls[2].artifact.source, PATCHED);
    assert!(compile_calls[2].auxiliary.is_empty());
}

#[tokio::test]
async fn test_persistent_compromise_ends_unsafe() {
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile").always(CLEAN_BUILD, 0),
        ScriptedVerifier::new("test").always(attack_results(true), 0),
        ScriptedGenerator::new().always(ATTACK),
    );

    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Unsafe);
    assert_eq!(
        report.outcome.reason,
        TerminalReason::BudgetExhausted {
            phase: PhaseId::from("execute"),
            attempts: 3
        }
    );
    assert_eq!(report.repairs, 2);
    assert_eq!(report.round, 3);
}

#[tokio::test]
async fn test_compromise_repairs_ignore_round_limit() {
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile").always(CLEAN_BUILD, 0),
        ScriptedVerifier::new("test").always(attack_results(true), 0),
        ScriptedGenerator::new().always(ATTACK),
    );

    let report = setup
        .orchestrator(PipelineConfig::adversarial().with_max_rounds(1))
        .run(artifact())
        .await;

    // Only the execute budget stops a compromised artifact from being repaired.
    assert_eq!(report.disposition(), Disposition::Unsafe);
    assert_eq!(
        report.outcome.reason,
        TerminalReason::BudgetExhausted {
            phase: PhaseId::from("execute"),
            attempts: 3
        }
    );
    assert_eq!(report.round, 3);
}

#[tokio::test]
async fn test_round_limit_stops_finding_repairs() {
    let analyze = Arc::new(ScriptedVerifier::new("analyze").always(RISKY_SCAN, 0));
    let shallow = Arc::new(ScriptedVerifier::new("fuzz-shallow"));
    let deep = Arc::new(ScriptedVerifier::new("fuzz-deep"));
    let compile = Arc::new(ScriptedVerifier::new("compile").always(CLEAN_BUILD, 0));
    let generator = Arc::new(ScriptedGenerator::new().always(PATCHED));

    let report = run_pipeline(
        artifact(),
        PipelineConfig::scan_and_fuzz().with_max_rounds(2),
        registry(&[&analyze, &shallow, &deep, &compile]),
        Some(Arc::clone(&generator) as Arc<dyn Generator>),
    )
    .await
    .expect("valid pipeline");

    assert_eq!(report.disposition(), Disposition::Inconclusive);
    assert_eq!(report.outcome.reason, TerminalReason::RoundLimit { rounds: 2 });
    assert_eq!(report.round, 2);
    assert_eq!(
        report.phase_sequence(),
        vec!["static", "fix", "check-fix", "static"]
    );
}

#[tokio::test]
async fn test_patch_that_fails_to_compile_is_repaired_again() {
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile")
            .then(CLEAN_BUILD, 0)
            .then(CLEAN_BUILD, 0)
            .then(TARGET_SYNTAX_ERROR, 1)
            .always(CLEAN_BUILD, 0),
        ScriptedVerifier::new("test")
            .then(attack_results(true), 0)
            .then(attack_results(false), 1),
        ScriptedGenerator::new()
            .then(ATTACK)
            .then(BROKEN_PATCH)
            .then(PATCHED)
            .then(ATTACK),
    );

    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Safe);
    assert_eq!(
        report.phase_sequence(),
        vec![
            "validate",
            "recon",
            "generate-attack",
            "check-attack",
            "execute",
            "generate-patch",
            "check-patch",
            "generate-patch",
            "check-patch",
            "recon",
            "generate-attack",
            "check-attack",
            "execute",
        ]
    );
    assert_eq!(report.repairs, 2);
    assert_eq!(report.round, 3);
    assert_eq!(report.final_artifact.source, PATCHED);
    assert_eq!(report.final_artifact.version, 2);

    let generations = setup.generator.calls();
    assert_eq!(generations.len(), 4);

    // The first patch sees only the exploit evidence.
    assert!(generations[1].feedback.is_none());

    // The second keeps that evidence and adds the rejected patch's compile errors.
    let retry = &generations[2];
    assert_eq!(retry.task, GenerationTask::Patch);
    assert_eq!(retry.artifact.source, BROKEN_PATCH);
    assert!(retry
        .diagnostic
        .as_deref()
        .is_some_and(|d| d.contains("testExploit()")));
    assert!(retry
        .feedback
        .as_deref()
        .is_some_and(|f| f.contains("Target.sol:10")));
}

#[tokio::test]
async fn test_failed_patch_chain_returns_to_original_failure() {
    let analyze = Arc::new(ScriptedVerifier::new("analyze").always(CLEAN_SCAN, 0));
    let shallow = Arc::new(
        ScriptedVerifier::new("fuzz-shallow")
            .then(fuzz_results(false), 1)
            .always(fuzz_results(true), 0),
    );
    let deep = Arc::new(ScriptedVerifier::new("fuzz-deep").always(fuzz_results(true), 0));
    let compile = Arc::new(
        ScriptedVerifier::new("compile")
            .then(TARGET_SYNTAX_ERROR, 1)
            .always(CLEAN_BUILD, 0),
    );
    let generator = Arc::new(
        ScriptedGenerator::new()
            .then(BROKEN_PATCH)
            .always(PATCHED),
    );

    let report = run_pipeline(
        artifact(),
        PipelineConfig::scan_and_fuzz(),
        registry(&[&analyze, &shallow, &deep, &compile]),
        Some(Arc::clone(&generator) as Arc<dyn Generator>),
    )
    .await
    .expect("valid pipeline");

    assert_eq!(report.disposition(), Disposition::Safe);
    assert_eq!(
        report.phase_sequence(),
        vec!["static", "fuzz-1", "fix", "check-fix", "fix", "check-fix", "fuzz-1", "fuzz-2"]
    );

    // Return goes back to the fuzz pass that first failed, not to the compiler.
    let back = report
        .transitions
        .iter()
        .rev()
        .find(|t| t.phase == PhaseId::from("check-fix"))
        .expect("check-fix transition");
    assert_eq!(back.next, Next::Phase(PhaseId::from("fuzz-1")));

    let second_fix = &generator.calls()[1];
    assert!(second_fix
        .diagnostic
        .as_deref()
        .is_some_and(|d| d.contains("balance invariant violated")));
    assert!(second_fix
        .feedback
        .as_deref()
        .is_some_and(|f| f.contains("Expected ';'")));
}

#[tokio::test]
async fn test_unclassifiable_attack_output_is_inconclusive() {
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile").always(CLEAN_BUILD, 0),
        ScriptedVerifier::new("test").always("nothing structured here", 0),
        ScriptedGenerator::new().always(ATTACK),
    );

    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Inconclusive);
    assert_eq!(
        report.outcome.reason,
        TerminalReason::Unclassifiable {
            phase: PhaseId::from("execute")
        }
    );
    let last = report.verdicts.last().expect("verdict");
    assert!(last.unclassified);
}

#[tokio::test]
async fn test_every_verifier_failing_still_terminates() {
    let outputs: [(&str, i32); 4] = [
        ("", 0),
        ("segmentation fault", 139),
        (EXPLOIT_COMPILE_ERROR, 1),
        (r#"{"success": false, "error": "solc not found"}"#, 1),
    ];

    for (compile_raw, compile_exit) in outputs {
        for (test_raw, test_exit) in outputs {
            let setup = Adversarial::new(
                ScriptedVerifier::new("compile").always(compile_raw, compile_exit),
                ScriptedVerifier::new("test").always(test_raw, test_exit),
                ScriptedGenerator::new().always(ATTACK),
            );
            let config = PipelineConfig::adversarial();
            let max_steps = config.max_steps;

            let report = setup.orchestrator(config).run(artifact()).await;

            assert!(report.steps <= max_steps);
            assert_ne!(report.disposition(), Disposition::Safe);
            assert_eq!(report.transitions.len() as u32, report.steps);
        }
    }

    // Verifiers that cannot even be spawned.
    let setup = Adversarial::new(
        ScriptedVerifier::new("compile"),
        ScriptedVerifier::new("test"),
        ScriptedGenerator::new(),
    );
    let report = setup.orchestrator(PipelineConfig::adversarial()).run(artifact()).await;
    assert_eq!(report.disposition(), Disposition::Inconclusive);
    assert_eq!(
        report.outcome.reason,
        TerminalReason::BudgetExhausted {
            phase: PhaseId::from("validate"),
            attempts: 3
        }
    );
}

#[tokio::test]
async fn test_identical_responses_yield_identical_transitions() {
    let first = compromise_then_resist()
        .orchestrator(PipelineConfig::adversarial())
        .run(artifact())
        .await;
    let second = compromise_then_resist()
        .orchestrator(PipelineConfig::adversarial())
        .run(artifact())
        .await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.transitions, second.transitions);
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.verdicts, second.verdicts);
    assert_eq!(first.final_artifact, second.final_artifact);
}

#[tokio::test]
async fn test_scan_and_fuzz_returns_to_failing_phase_after_repair() {
    let analyze = Arc::new(ScriptedVerifier::new("analyze").always(CLEAN_SCAN, 0));
    let shallow = Arc::new(
        ScriptedVerifier::new("fuzz-shallow")
            .then(fuzz_results(false), 1)
            .always(fuzz_results(true), 0),
    );
    let deep = Arc::new(ScriptedVerifier::new("fuzz-deep").always(fuzz_results(true), 0));
    let compile = Arc::new(ScriptedVerifier::new("compile").always(CLEAN_BUILD, 0));
    let generator = Arc::new(ScriptedGenerator::new().always(PATCHED));

    let report = run_pipeline(
        artifact(),
        PipelineConfig::scan_and_fuzz(),
        registry(&[&analyze, &shallow, &deep, &compile]),
        Some(Arc::clone(&generator) as Arc<dyn Generator>),
    )
    .await
    .expect("valid pipeline");

    assert_eq!(report.disposition(), Disposition::Safe);
    assert_eq!(
        report.phase_sequence(),
        vec!["static", "fuzz-1", "fix", "check-fix", "fuzz-1", "fuzz-2"]
    );
    assert_eq!(report.round, 2);
    assert_eq!(shallow.calls()[1].artifact.source, PATCHED);

    let patch_request = &generator.calls()[0];
    assert!(patch_request
        .diagnostic
        .as_deref()
        .is_some_and(|d| d.contains("balance invariant violated")));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Compiles cleanly and cancels the run it belongs to on first use.
struct CancellingVerifier {
    handle: Arc<OnceLock<CancelHandle>>,
}

#[async_trait]
impl Verifier for CancellingVerifier {
    fn name(&self) -> &str {
        "compile"
    }

    async fn verify(&self, _request: &VerifyRequest) -> anyhow::Result<ToolOutput> {
        if let Some(handle) = self.handle.get() {
            handle.cancel();
        }
        Ok(ToolOutput::new(CLEAN_BUILD, 0))
    }
}

#[tokio::test]
async fn test_cancel_between_phases() {
    let slot = Arc::new(OnceLock::new());
    let analyze = Arc::new(ScriptedVerifier::new("analyze").always(CLEAN_SCAN, 0));
    let test = Arc::new(ScriptedVerifier::new("test"));
    let verifiers: Vec<Arc<dyn Verifier>> = vec![
        Arc::new(CancellingVerifier {
            handle: Arc::clone(&slot),
        }),
        analyze.clone(),
        test,
    ];
    let orchestrator = Orchestrator::new(
        PipelineConfig::adversarial(),
        verifiers,
        Some(Arc::new(ScriptedGenerator::new()) as Arc<dyn Generator>),
    )
    .expect("valid orchestrator");
    slot.set(orchestrator.cancel_handle())
        .expect("handle set once");

    let report = orchestrator.run(artifact()).await;

    assert_eq!(report.disposition(), Disposition::Inconclusive);
    assert_eq!(report.outcome.reason, TerminalReason::Cancelled);
    assert_eq!(report.steps, 1);
    assert_eq!(analyze.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let setup = compromise_then_resist();
    let orchestrator = setup.orchestrator(PipelineConfig::adversarial());
    let handle = orchestrator.cancel_handle();
    handle.cancel();
    assert!(handle.is_cancelled());

    let report = orchestrator.run(artifact()).await;

    assert_eq!(report.outcome.reason, TerminalReason::Cancelled);
    assert_eq!(report.steps, 0);
    assert_eq!(setup.compile.call_count(), 0);
    assert_eq!(report.final_artifact, artifact());
}

// ---------------------------------------------------------------------------
// Construction and persistence
// ---------------------------------------------------------------------------

#[test]
fn test_missing_verifier_rejected() {
    let compile = Arc::new(ScriptedVerifier::new("compile"));
    let result = Orchestrator::new(
        PipelineConfig::adversarial(),
        registry(&[&compile]),
        Some(Arc::new(ScriptedGenerator::new()) as Arc<dyn Generator>),
    );
    assert!(matches!(
        result,
        Err(PipelineError::UnknownVerifier { verifier, .. }) if verifier == "analyze"
    ));
}

#[test]
fn test_missing_generator_rejected() {
    let compile = Arc::new(ScriptedVerifier::new("compile"));
    let analyze = Arc::new(ScriptedVerifier::new("analyze"));
    let test = Arc::new(ScriptedVerifier::new("test"));
    let result = Orchestrator::new(
        PipelineConfig::adversarial(),
        registry(&[&compile, &analyze, &test]),
        None,
    );
    assert!(matches!(result, Err(PipelineError::MissingGenerator)));
}

#[test]
fn test_duplicate_verifier_rejected() {
    let a = Arc::new(ScriptedVerifier::new("compile"));
    let b = Arc::new(ScriptedVerifier::new("compile"));
    let result = Orchestrator::new(
        PipelineConfig::scan_and_fuzz(),
        registry(&[&a, &b]),
        Some(Arc::new(ScriptedGenerator::new()) as Arc<dyn Generator>),
    );
    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_report_persists_and_verifies() {
    let report = compromise_then_resist()
        .orchestrator(PipelineConfig::adversarial())
        .run(artifact())
        .await;
    let dir = tempfile::tempdir().expect("tempdir");

    write_run_report(&report, dir.path()).expect("write report");
    let loaded = read_run_report(&report.run_id, dir.path()).expect("read report");

    assert_eq!(loaded, report);
    assert_eq!(loaded.budget[&PhaseId::from("execute")].count, 1);
}
