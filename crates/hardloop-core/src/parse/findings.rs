//! Static-analysis findings (slither `--json` detectors).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ItemResult;

/// Detector impact, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Optimization,
    Informational,
    Low,
    Medium,
    High,
}

impl Impact {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Impact::High,
            "medium" => Impact::Medium,
            "low" => Impact::Low,
            "optimization" => Impact::Optimization,
            _ => Impact::Informational,
        }
    }
}

/// One analyzer finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Rule id (slither `check`, e.g. `reentrancy-eth`).
    pub check: String,
    pub impact: Impact,
    pub confidence: String,
    pub description: String,
    /// Affected source lines, ascending and de-duplicated.
    pub lines: Vec<u32>,
}

impl Finding {
    pub fn to_item(&self) -> ItemResult {
        ItemResult::new(self.check.clone(), false, self.description.trim())
    }
}

/// Parse a detectors list. `None` if `value` is not an array.
pub fn parse_findings(value: &Value) -> Option<Vec<Finding>> {
    let entries = value.as_array()?;
    Some(entries.iter().map(finding_from).collect())
}

fn finding_from(entry: &Value) -> Finding {
    let text = |key: &str, default: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    let mut lines: Vec<u32> = entry
        .get("elements")
        .and_then(Value::as_array)
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| e.get("source_mapping")?.get("lines")?.as_array())
                .flatten()
                .filter_map(|l| l.as_u64().and_then(|n| u32::try_from(n).ok()))
                .collect()
        })
        .unwrap_or_default();
    lines.sort_unstable();
    lines.dedup();

    Finding {
        check: text("check", "unknown"),
        impact: Impact::from_label(&text("impact", "informational")),
        confidence: text("confidence", "unknown"),
        description: text("description", "no description"),
        lines,
    }
}

/// Render findings as the plain-text report handed to the patch generator.
pub fn format_findings_report(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "Static analysis: no findings.".to_string();
    }

    let mut report = String::from("=== Static Analysis Report ===\n");
    for (idx, finding) in findings.iter().enumerate() {
        let lines = if finding.lines.is_empty() {
            "unknown".to_string()
        } else {
            finding
                .lines
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        report.push_str(&format!(
            "{}. [{}] impact={:?} confidence={}\n   {}\n   lines: {}\n",
            idx + 1,
            finding.check,
            finding.impact,
            finding.confidence,
            finding.description.trim(),
            lines
        ));
    }
    report
}
