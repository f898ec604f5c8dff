//! LLM Provider Contract (component J): a cancellable streaming completion
//! call. Real transports (Anthropic, OpenAI, etc.) are external
//! collaborators; [`MockLlmProvider`] drives deterministic scripted output
//! for planner/validator/action-loop tests.

use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message_log::LogEntry;

/// Errors a provider call can surface. `is_retryable` lets the Failure
/// Governor classify without string matching; `http_status` lets it apply
/// the `[400,500) \ {429}` non-recoverable rule uniformly across providers.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimit,
    #[error("request timed out")]
    Timeout,
    #[error("provider returned http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("stream was cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::RateLimit | ProviderError::Timeout
        )
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One incremental event emitted while a completion streams in.
#[derive(Debug, Clone)]
pub enum StreamPart {
    ReasoningStart,
    ReasoningDelta(String),
    ReasoningEnd,
    ToolInputStart { tool_name: String },
    ToolCall { tool_name: String, input: Value },
}

/// A single declared tool the model may call, as handed to the provider.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Required,
    Auto,
}

/// Everything the Action Loop, Planner, and Validator need to ask the
/// model to choose one tool over the current message log.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<LogEntry>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub max_output_tokens: u32,
}

/// One resolved tool call plus its arguments, as the stream finishes.
#[derive(Debug, Clone)]
pub struct ResolvedToolCall {
    pub tool_name: String,
    pub input: Value,
}

/// The aggregated result once a stream has fully drained.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub tool_calls: Vec<ResolvedToolCall>,
    pub finish_reason: String,
}

/// Handle to a streaming completion: an event stream plus a join that
/// yields the aggregated result once the stream drains.
pub struct StreamHandle {
    pub events: Pin<Box<dyn Stream<Item = StreamPart> + Send>>,
    outcome: CompletionOutcome,
}

impl StreamHandle {
    pub fn new(parts: Vec<StreamPart>, outcome: CompletionOutcome) -> Self {
        Self {
            events: Box::pin(stream::iter(parts)),
            outcome,
        }
    }

    /// Pull the next incremental event, for callers that want to observe
    /// reasoning/tool-input progress before joining on [`Self::finish`].
    pub async fn next_event(&mut self) -> Option<StreamPart> {
        self.events.next().await
    }

    /// Drain any remaining events, then hand back the aggregated result.
    /// Mirrors the source interface's `toolResults`/`response` pairing:
    /// the stream is for live progress, `finish` is for the final answer.
    pub async fn finish(mut self) -> CompletionOutcome {
        while self.events.next().await.is_some() {}
        self.outcome
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a completion, honoring cancellation mid-stream.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancellation: Option<CancellationToken>,
    ) -> Result<StreamHandle, ProviderError>;
}

/// One scripted turn a `MockLlmProvider` will hand back, in order.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    ToolCall {
        reasoning: Option<String>,
        tool_name: String,
        input: Value,
    },
    /// The model's turn ends without calling any tool — exercises the
    /// Action Loop's "no tool called" branch.
    NoToolCall,
}

impl ScriptedResponse {
    pub fn tool_call(tool_name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            reasoning: None,
            tool_name: tool_name.into(),
            input,
        }
    }

    pub fn no_tool_call() -> Self {
        Self::NoToolCall
    }
}

/// Deterministic provider driven by a queue of scripted responses,
/// optionally interspersed with errors. Used throughout the test suite in
/// place of a real streaming transport.
pub struct MockLlmProvider {
    script: Mutex<std::collections::VecDeque<Result<ScriptedResponse, ProviderError>>>,
}

impl MockLlmProvider {
    pub fn new(script: Vec<Result<ScriptedResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    pub fn single(response: ScriptedResponse) -> Self {
        Self::new(vec![Ok(response)])
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn stream(
        &self,
        _request: CompletionRequest,
        cancellation: Option<CancellationToken>,
    ) -> Result<StreamHandle, ProviderError> {
        if let Some(token) = &cancellation {
            if token.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Other("mock script exhausted".to_string())));

        let response = next?;

        let ScriptedResponse::ToolCall { reasoning, tool_name, input } = response else {
            return Ok(StreamHandle::new(
                vec![],
                CompletionOutcome {
                    tool_calls: vec![],
                    finish_reason: "end_turn".to_string(),
                },
            ));
        };

        let mut parts = Vec::new();
        if let Some(reasoning) = &reasoning {
            parts.push(StreamPart::ReasoningStart);
            parts.push(StreamPart::ReasoningDelta(reasoning.clone()));
            parts.push(StreamPart::ReasoningEnd);
        }
        parts.push(StreamPart::ToolInputStart {
            tool_name: tool_name.clone(),
        });
        parts.push(StreamPart::ToolCall {
            tool_name: tool_name.clone(),
            input: input.clone(),
        });

        let outcome = CompletionOutcome {
            tool_calls: vec![ResolvedToolCall { tool_name, input }],
            finish_reason: "tool_calls".to_string(),
        };

        Ok(StreamHandle::new(parts, outcome))
    }
}
