//! Hierarchical execution identifiers

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SEPARATOR: char = ':';

/// Trace identifier for one execution
///
/// A root id is generated per root execution. Fork branches extend it
/// with a colon-joined segment, so branch 1 of `abc` is `abc:1` and
/// branch 0 of that is `abc:1:0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh root id
    pub fn new_root() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive the id of a sub-execution
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        Self(format!("{}{SEPARATOR}{segment}", self.0))
    }

    /// The id this one was derived from, if any
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// The root segment shared by every descendant
    pub fn root(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Number of fork levels below the root
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count()
    }

    pub fn is_root(&self) -> bool {
        self.depth() == 0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExecutionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
