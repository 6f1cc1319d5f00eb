//! Fixed fuzz harnesses written next to the artifact.

use hardloop_core::AuxFile;

/// Contract name implied by a file name (`Target.sol` -> `Target`).
pub fn contract_name(artifact_name: &str) -> &str {
    let file = artifact_name.rsplit('/').next().unwrap_or(artifact_name);
    file.strip_suffix(".sol").unwrap_or(file)
}

/// File name of the harness for fuzz pass `iteration`.
pub fn harness_name(iteration: u32) -> String {
    format!("FuzzTest{iteration}.t.sol")
}

/// Deposit/withdraw property harness against the contract in `artifact_name`.
///
/// The harness assumes the contract has a no-argument constructor, accepts
/// plain ether transfers and exposes `withdraw()`.
pub fn fuzz_harness(artifact_name: &str, iteration: u32) -> AuxFile {
    let contract = contract_name(artifact_name);
    let content = format!(
        r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

import "forge-std/Test.sol";
import "./{artifact_name}";

contract FuzzTest{iteration} is Test {{
    {contract} public target;

    function setUp() public {{
        target = new {contract}();
    }}

    function testFuzz_DepositWithdraw(address user, uint256 amount) public {{
        vm.assume(user != address(0));
        vm.assume(amount > 0 && amount < 100 ether);

        vm.deal(user, amount);
        vm.prank(user);
        (bool success, ) = address(target).call{{value: amount}}("");
        if (success) {{
            vm.prank(user);
            (bool withdrawSuccess, ) = address(target).call(
                abi.encodeWithSignature("withdraw()")
            );
            assertTrue(withdrawSuccess || address(target).balance >= 0);
        }}
    }}

    function testFuzz_BalanceCheck(address user, uint256 amount) public {{
        vm.assume(user != address(0));
        vm.assume(amount > 0 && amount < 100 ether);

        uint256 initialBalance = address(target).balance;

        vm.deal(user, amount);
        vm.prank(user);
        (bool success, ) = address(target).call{{value: amount}}("");
        if (success) {{
            assertEq(address(target).balance, initialBalance + amount, "balance mismatch");
        }}
    }}
}}
"#
    );
    AuxFile::new(harness_name(iteration), content)
}
