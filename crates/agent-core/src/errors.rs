//! Error taxonomy for the agent control loop.
//!
//! Recovery class is encoded in the type, not inferred at the call site:
//! `SetupError` aborts `execute` before the loop starts, `RecoverableError`
//! and `ToolExecutionError` are caught and classified by the Failure
//! Governor, and `ProviderError`/`ToolCatalogError` are the leaves other
//! modules raise before they reach the governor.

use thiserror::Error;

use crate::browser::BrowserError;
use crate::llm_provider::ProviderError;

/// Raised by `Agent::execute` itself, before any task-level result can be
/// produced. Never folded into `TaskExecutionResult`.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("task text must not be empty")]
    EmptyTask,

    #[error("starting url is not a valid url: {0}")]
    InvalidStartingUrl(String),

    #[error("failed to generate plan: {0}")]
    Planning(String),

    #[error("search provider requires an api key")]
    MissingSearchKey,

    #[error("search provider configured but no search service was supplied")]
    SearchServiceNotConfigured,

    #[error("no starting url determined")]
    NoStartingUrl,

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// An error the Action Loop threw that the Failure Governor should be given
/// a chance to classify and recover from (distinct from the terminal
/// `ToolExecutionError`, which already carries its own recovery verdict).
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct RecoverableError {
    pub message: String,
    /// Present when the error originated at an HTTP-speaking boundary
    /// (the LLM provider); lets the governor apply the 4xx-except-429 rule.
    pub http_status: Option<u16>,
}

impl RecoverableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            http_status: Some(status),
        }
    }
}

impl From<ProviderError> for RecoverableError {
    fn from(err: ProviderError) -> Self {
        Self {
            http_status: err.http_status(),
            message: err.to_string(),
        }
    }
}

/// The outcome of dispatching a single tool call said `success:false` and
/// the tool itself marked the failure as recoverable. The tool-result
/// envelope is already on the message log, so the Failure Governor must
/// not append a duplicate user-facing message for this variant.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct ToolExecutionError(pub String);

/// The single error type the Action Loop's per-iteration step can produce;
/// everything else it wants to surface is funnelled through one of these.
#[derive(Debug, Error, Clone)]
pub enum IterationError {
    #[error(transparent)]
    Tool(#[from] ToolExecutionError),
    #[error(transparent)]
    Recoverable(#[from] RecoverableError),
}

impl IterationError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            IterationError::Tool(_) => None,
            IterationError::Recoverable(err) => err.http_status,
        }
    }
}
