#![allow(dead_code)]

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Shared error type for crates that need a lightweight, cloneable error
/// (the event bus publishes this when a broadcast channel closes).
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("{message}")]
    Message { message: String },
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Identifier assigned by the caller (or generated) for one `execute` call.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-iteration token. Unique within one task, carries no meaning
/// beyond correlating log lines and events for a single loop iteration.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct IterationId(pub String);

impl IterationId {
    /// Mint a new 8-character opaque token (lowercase hex, truncated uuid).
    pub fn new() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..8].to_string())
    }
}

impl Default for IterationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A page-element reference of the form `s1e<n>`, scoped to exactly one
/// snapshot. Not stable across page transitions; see the browser contract's
/// ref lifecycle invariant for details.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(index: u32) -> Self {
        Self(format!("s1e{index}"))
    }

    /// Parse the numeric suffix out of a `s1e<n>` token, if well-formed.
    pub fn index(&self) -> Option<u32> {
        self.0.strip_prefix("s1e")?.parse().ok()
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
