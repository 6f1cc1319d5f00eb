//! The artifact under test and the auxiliary files that travel with it.

use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;

/// One version of the source text being hardened.
///
/// Version 0 is the untouched input. Each successful repair yields a new
/// value through [`Artifact::revise`]; an existing value is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name the verifiers know the artifact by (e.g. `Target.sol`).
    pub name: String,

    /// Full source text.
    pub source: String,

    /// 0 for the initial input, incremented per repair.
    pub version: u32,

    /// SHA-256 of `source`.
    pub digest: String,
}

impl Artifact {
    /// Create the initial (version 0) artifact.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: name.into(),
            digest: sha256_hex(source.as_bytes()),
            source,
            version: 0,
        }
    }

    /// Produce the next version carrying `source`.
    pub fn revise(&self, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: self.name.clone(),
            digest: sha256_hex(source.as_bytes()),
            source,
            version: self.version + 1,
        }
    }

    /// Whether this is the untouched input.
    pub fn is_initial(&self) -> bool {
        self.version == 0
    }
}

/// A generated or fixed companion file (attack script, fuzz harness).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxFile {
    pub name: String,
    pub content: String,
}

impl AuxFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}
