//! Compiler diagnostics from solc / forge output.
//!
//! Prefers the structured `errors` array (solc standard-JSON, `forge build
//! --json`) located anywhere in the stream; falls back to the human-readable
//! block format:
//!
//! ```text
//! Error (2314): Expected ';' but got '}'
//!   --> src/Target.sol:10:5:
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::{Diagnostic, Severity};
use crate::parse::structured::extract_structured;

const ERRORS_KEY: &str = "errors";

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<kind>[A-Za-z]*Error|Warning|Info|Note)(?:\s*\((?P<code>\d+)\))?:\s*(?P<msg>.+?)\s*$")
            .expect("static pattern")
    })
}

fn arrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-->\s*(?P<file>[^\s:][^:]*?):(?P<line>\d+):(?P<col>\d+)").expect("static pattern")
    })
}

fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<file>[^\s:][^:]*?):(?P<line>\d+):(?P<col>\d+):\s*(?P<kind>[A-Za-z]*Error|Warning):\s*(?P<msg>.+?)\s*$")
            .expect("static pattern")
    })
}

/// Parse every diagnostic a compiler run reported, in output order.
pub fn parse_compiler_output(raw: &str) -> Vec<Diagnostic> {
    match extract_structured(raw, ERRORS_KEY) {
        Some(Value::Array(entries)) => entries.iter().filter_map(diagnostic_from_json).collect(),
        _ => parse_text_diagnostics(raw),
    }
}

fn diagnostic_from_json(entry: &Value) -> Option<Diagnostic> {
    let obj = entry.as_object()?;
    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::from_label)
        .unwrap_or(Severity::Error);
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| obj.get("formattedMessage").and_then(Value::as_str))
        .unwrap_or("unknown compiler error");

    let mut diag = Diagnostic::new(severity, message.trim());
    if let Some(code) = obj.get("errorCode").and_then(Value::as_str) {
        diag = diag.with_code(code);
    }

    let formatted = obj.get("formattedMessage").and_then(Value::as_str);
    let location = formatted.and_then(|text| arrow_re().captures(text));
    match location {
        Some(caps) => {
            let line = caps["line"].parse().unwrap_or(0);
            let col = caps["col"].parse().unwrap_or(0);
            diag = diag.with_location(caps["file"].trim(), line, col);
        }
        None => {
            let file = obj
                .get("sourceLocation")
                .and_then(|loc| loc.get("file"))
                .and_then(Value::as_str);
            if let Some(file) = file {
                diag = diag.with_file(file);
            }
        }
    }
    Some(diag)
}

/// Line-oriented fallback for plain-text compiler output.
pub fn parse_text_diagnostics(raw: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    // Index of the last header still waiting for its `-->` location line.
    let mut awaiting_location: Option<usize> = None;

    for line in raw.lines() {
        if let Some(caps) = inline_re().captures(line) {
            let line_no = caps["line"].parse().unwrap_or(0);
            let col = caps["col"].parse().unwrap_or(0);
            diagnostics.push(
                Diagnostic::new(Severity::from_label(kind_label(&caps["kind"])), &caps["msg"])
                    .with_location(caps["file"].trim(), line_no, col),
            );
            awaiting_location = None;
            continue;
        }

        if let Some(caps) = header_re().captures(line) {
            let mut diag =
                Diagnostic::new(Severity::from_label(kind_label(&caps["kind"])), &caps["msg"]);
            if let Some(code) = caps.name("code") {
                diag = diag.with_code(code.as_str());
            }
            diagnostics.push(diag);
            awaiting_location = Some(diagnostics.len() - 1);
            continue;
        }

        if let (Some(idx), Some(caps)) = (awaiting_location, arrow_re().captures(line)) {
            let line_no = caps["line"].parse().unwrap_or(0);
            let col = caps["col"].parse().unwrap_or(0);
            let located = diagnostics[idx]
                .clone()
                .with_location(caps["file"].trim(), line_no, col);
            diagnostics[idx] = located;
            awaiting_location = None;
        }
    }

    diagnostics
}

/// `ParserError`, `TypeError`, `DeclarationError`... all map to `error`.
fn kind_label(kind: &str) -> &str {
    if kind.ends_with("Error") {
        "error"
    } else {
        kind
    }
}
