use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a pipeline phase; also its retry-budget key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(pub String);

impl PhaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhaseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PhaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
