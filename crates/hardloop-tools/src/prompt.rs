//! Prompts for the attack and patch generation tasks.

use hardloop_core::{truncate_tail, GenerationRequest, GenerationTask};

/// Cap on test output quoted in patch prompts.
pub const MAX_LOG_CHARS: usize = 2000;

const FENCE: &str = "```";

pub const SYSTEM_PROMPT: &str =
    "You are a smart contract security engineer. Answer with Solidity source only.";

/// Render the user message for `request`.
pub fn render(request: &GenerationRequest) -> String {
    match request.task {
        GenerationTask::Attack => attack_prompt(request),
        GenerationTask::Patch => patch_prompt(request),
    }
}

fn attack_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "You are auditing the contract below and must prove it can be exploited.\n\n\
         Target contract ({name}):\n\
         {FENCE}solidity\n{source}\n{FENCE}\n\n",
        name = request.artifact.name,
        source = request.artifact.source,
    );

    if let Some(report) = request.diagnostic.as_deref().filter(|d| !d.trim().is_empty()) {
        prompt.push_str("Static analysis report:\n");
        prompt.push_str(report);
        prompt.push_str("\n\n");
    }

    if let Some(feedback) = request.feedback.as_deref() {
        prompt.push_str("Your previous exploit was rejected:\n");
        prompt.push_str(feedback);
        prompt.push_str("\nFix it.\n\n");
    }

    prompt.push_str(&format!(
        "Write a Foundry test contract named `ExploitTest` that reproduces the vulnerability and drains funds.\n\
         Requirements:\n\
         1. Import `forge-std/Test.sol` and `./{name}`; `ExploitTest` must inherit `Test`.\n\
         2. `setUp()` deploys the target and funds it with 10 ether.\n\
         3. `testExploit()` performs the attack (reentrancy, broken access control, ...) using \
         `vm.prank` / `vm.deal` for the attacker and asserts that it succeeded, \
         e.g. `assertGt(attacker.balance, 0)`.\n\
         4. Put helper contracts (such as a malicious receiver) in the same file.\n\
         5. Output Solidity code only, without explanations or comments.",
        name = request.artifact.name,
    ));
    prompt
}

fn patch_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "Your contract failed a security check and must be fixed.\n\n\
         === Current contract ({name}) ===\n\
         {FENCE}solidity\n{source}\n{FENCE}\n\n",
        name = request.artifact.name,
        source = request.artifact.source,
    );

    for file in &request.auxiliary {
        prompt.push_str(&format!(
            "=== {name} ===\n{FENCE}solidity\n{content}\n{FENCE}\n\n",
            name = file.name,
            content = file.content,
        ));
    }

    if let Some(evidence) = request.diagnostic.as_deref().filter(|d| !d.trim().is_empty()) {
        prompt.push_str("=== Failure evidence ===\n");
        prompt.push_str(&truncate_tail(evidence, MAX_LOG_CHARS));
        prompt.push_str("\n\n");
    }

    if let Some(feedback) = request.feedback.as_deref() {
        prompt.push_str("Your previous fix was rejected:\n");
        prompt.push_str(&truncate_tail(feedback, MAX_LOG_CHARS));
        prompt.push_str("\nCorrect these errors and keep the vulnerability fixed.\n\n");
    }

    prompt.push_str(
        "Requirements:\n\
         1. Fix only the vulnerability; do not break existing business logic \
         (deposit and withdraw must keep working).\n\
         2. Identify the vulnerability class the evidence shows \
         (reentrancy, overflow, access control, ...).\n\
         3. Apply the standard remedy, e.g. checks-effects-interactions or a `ReentrancyGuard`.\n\
         4. Output the complete fixed contract.\n\
         5. Output Solidity code only, without explanations.",
    );
    prompt
}
