//! Per-test results from a dynamic test runner (`forge test --json`).
//!
//! The runner emits `{"<suite>": {"test_results": {"<fn>": {"status": ...,
//! "reason": ...}}}}`; callers hand in the value found under the results key.

use serde_json::Value;

use crate::domain::ItemResult;

/// Convert a results map (or a list of `{name, status, reason}` records)
/// into ordered item results. `None` when the value has neither shape.
pub fn parse_test_results(value: &Value) -> Option<Vec<ItemResult>> {
    match value {
        Value::Object(map) => Some(
            map.iter()
                .map(|(name, result)| item_from(name, result))
                .collect(),
        ),
        Value::Array(entries) => entries
            .iter()
            .map(|entry| {
                let name = entry.get("name").and_then(Value::as_str)?;
                Some(item_from(name, entry))
            })
            .collect(),
        _ => None,
    }
}

fn item_from(name: &str, result: &Value) -> ItemResult {
    let status = result
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let passed = is_success(status);
    let reason = match result.get("reason") {
        Some(Value::String(reason)) => reason.clone(),
        Some(Value::Null) | None if passed => String::new(),
        Some(Value::Null) | None => format!("status: {}", display_status(status)),
        Some(other) => other.to_string(),
    };
    ItemResult::new(name, passed, reason)
}

fn is_success(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "success" | "pass" | "passed" | "ok"
    )
}

fn display_status(status: &str) -> &str {
    if status.is_empty() {
        "unknown"
    } else {
        status
    }
}
