//! Error types for hardloop-tools

use thiserror::Error;

/// Errors raised while configuring or wiring concrete collaborators.
///
/// Errors raised *during* a run (a crashed compiler, a failed HTTP call)
/// travel as `anyhow::Error` through the core traits instead.
#[derive(Error, Debug)]
pub enum ToolsError {
    /// Configuration value out of range or inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Named pipeline preset does not exist
    #[error("unknown pipeline preset: {0}")]
    UnknownPreset(String),

    /// Generator credentials missing
    #[error("no API key: set {0} or HARDLOOP_LLM_API_KEY")]
    MissingApiKey(String),

    /// Auxiliary file name would land outside the workspace
    #[error("file name escapes the workspace: {0}")]
    UnsafePath(String),

    /// Pipeline validation failed
    #[error(transparent)]
    Pipeline(#[from] hardloop_core::PipelineError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ToolsError {
    fn from(err: reqwest::Error) -> Self {
        ToolsError::Http(err.to_string())
    }
}

/// Result type for tools operations
pub type Result<T> = std::result::Result<T, ToolsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_names_variable() {
        let err = ToolsError::MissingApiKey("DASHSCOPE_API_KEY".to_string());
        assert!(err.to_string().contains("DASHSCOPE_API_KEY"));
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err: ToolsError = hardloop_core::PipelineError::MissingGenerator.into();
        assert_eq!(
            err.to_string(),
            hardloop_core::PipelineError::MissingGenerator.to_string()
        );
    }
}
