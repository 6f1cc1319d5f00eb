//! Normalized compiler diagnostics.

use serde::{Deserialize, Serialize};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Lenient mapping from tool vocabularies (`error`, `Warning`, `info`...).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" | "fatalerror" => Severity::Error,
            "warning" | "warn" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// A single diagnostic record from a multi-file build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    /// Severity level.
    pub severity: Severity,

    /// Human-readable message.
    pub message: String,

    /// Source file as reported by the tool; may be absolute, relative or
    /// a path inside the sandbox container.
    pub file: Option<String>,

    /// Line number (1-indexed).
    pub line: Option<u32>,

    /// Column number (1-indexed).
    pub column: Option<u32>,

    /// Tool error code (e.g. solc `2314`).
    pub code: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic without location.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            code: None,
        }
    }

    /// Set file location.
    pub fn with_location(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Set file without a line/column.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Set diagnostic code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// One-line rendering used in repair diagnostics.
    pub fn render(&self) -> String {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        let code = self
            .code
            .as_deref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default();
        match (&self.file, self.line) {
            (Some(file), Some(line)) => {
                format!("{level}{code}: {} --> {file}:{line}", self.message)
            }
            (Some(file), None) => format!("{level}{code}: {} --> {file}", self.message),
            _ => format!("{level}{code}: {}", self.message),
        }
    }
}
