//! Error taxonomy for pipeline configuration and run persistence.
//!
//! Tool failures never show up here: anything a Verifier or Generator
//! raises is reclassified into a `ToolError` verdict at the call site.

/// Errors produced while building, validating or persisting a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("phase {from} routes to unknown phase {target}")]
    UnknownPhase { from: String, target: String },

    #[error("duplicate phase id: {0}")]
    DuplicatePhase(String),

    #[error("phase {phase} is unreachable from entry {entry}")]
    UnreachablePhase { phase: String, entry: String },

    #[error("phase {phase} references unregistered verifier {verifier}")]
    UnknownVerifier { phase: String, verifier: String },

    #[error("pipeline has generator phases but no generator was supplied")]
    MissingGenerator,

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_phase_display() {
        let err = PipelineError::UnknownPhase {
            from: "execute".to_string(),
            target: "nowhere".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("execute"));
        assert!(msg.contains("nowhere"));
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = PipelineError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }
}
