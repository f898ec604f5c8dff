//! Component G: the per-iteration state machine (§4.G). One call to
//! [`run_iteration`] is one (optional snapshot → streaming LLM call → tool
//! dispatch → repetition check) cycle.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use webloop_core_types::IterationId;

use crate::action_loop::prompt::{
    excessive_repetition_reason, repetition_warning_prompt, snapshot_prompt,
};
use crate::browser::{Browser, BrowserAction, LoadState};
use crate::errors::{IterationError, RecoverableError, ToolExecutionError};
use crate::events::AgentEvent;
use crate::llm_provider::{
    CompletionRequest, LlmProvider, StreamPart, ToolChoice, ToolSpec,
};
use crate::message_log::{LogEntry, MessageLog};
use crate::search::SearchService;
use crate::snapshot_compressor::SnapshotCompressor;
use crate::tool_catalog::{self, ToolResult};
use webloop_core_types::{ElementRef, TaskId};
use webloop_event_bus::{EventBus, InMemoryBus};

/// Mutable per-task fields the Action Loop needs across iterations that
/// don't belong to the Failure Governor's own counters (§3 "iteration
/// state").
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub needs_page_snapshot: bool,
    pub last_action_signature: Option<String>,
    pub action_repeat_count: u32,
}

impl LoopState {
    /// `about:blank` starts skip the first snapshot (§4.G "Starting
    /// condition"); any real starting url takes one immediately.
    pub fn starting(starting_url: &str) -> Self {
        Self {
            needs_page_snapshot: starting_url != "about:blank",
            last_action_signature: None,
            action_repeat_count: 0,
        }
    }
}

/// What the Orchestrator should do with the rest of the loop after one
/// iteration completes without raising an `IterationError` (errors are
/// raised instead, for the Failure Governor to classify).
#[derive(Debug, Clone)]
pub enum IterationOutcome {
    /// Neither terminal nor repetition-aborted; keep looping. `counted` is
    /// false exactly for the iteration that hits the repetition-warning
    /// threshold (§4.G step 8) — that action happened, but does not count
    /// towards `ExecutionStats::actions`.
    Continue { counted: bool },
    /// `done(result)` was called; the caller must now run the Validator.
    ProposeDone { result: String },
    /// `abort(description)` was called, or the repetition threshold was hit.
    Aborted { reason: String },
}

fn web_action_tools() -> Vec<ToolSpec> {
    let schema_ref = || serde_json::json!({"ref": {"type": "string"}});
    let merge = |mut base: Value, extra: Value| {
        if let (Some(b), Some(e)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in e {
                b.insert(k.clone(), v.clone());
            }
        }
        base
    };
    let obj = |props: Value, required: &[&str]| {
        serde_json::json!({"type": "object", "properties": props, "required": required})
    };

    vec![
        ToolSpec { name: "click".into(), description: "Click an element.".into(), input_schema: obj(schema_ref(), &["ref"]) },
        ToolSpec { name: "hover".into(), description: "Hover over an element.".into(), input_schema: obj(schema_ref(), &["ref"]) },
        ToolSpec {
            name: "fill".into(),
            description: "Fill a form field with a value.".into(),
            input_schema: obj(merge(schema_ref(), serde_json::json!({"value": {"type": "string"}})), &["ref", "value"]),
        },
        ToolSpec {
            name: "fill_and_enter".into(),
            description: "Fill a form field and press enter.".into(),
            input_schema: obj(merge(schema_ref(), serde_json::json!({"value": {"type": "string"}})), &["ref", "value"]),
        },
        ToolSpec { name: "focus".into(), description: "Focus an element.".into(), input_schema: obj(schema_ref(), &["ref"]) },
        ToolSpec { name: "check".into(), description: "Check a checkbox.".into(), input_schema: obj(schema_ref(), &["ref"]) },
        ToolSpec { name: "uncheck".into(), description: "Uncheck a checkbox.".into(), input_schema: obj(schema_ref(), &["ref"]) },
        ToolSpec {
            name: "select".into(),
            description: "Select an option in a dropdown.".into(),
            input_schema: obj(merge(schema_ref(), serde_json::json!({"value": {"type": "string"}})), &["ref", "value"]),
        },
        ToolSpec { name: "enter".into(), description: "Press enter on a focused element.".into(), input_schema: obj(schema_ref(), &["ref"]) },
        ToolSpec {
            name: "wait".into(),
            description: "Wait for a number of seconds in [0, 30].".into(),
            input_schema: obj(serde_json::json!({"seconds": {"type": "integer", "minimum": 0, "maximum": 30}}), &["seconds"]),
        },
        ToolSpec {
            name: "goto".into(),
            description: "Navigate directly to a url.".into(),
            input_schema: obj(serde_json::json!({"url": {"type": "string"}}), &["url"]),
        },
        ToolSpec { name: "back".into(), description: "Go back in browser history.".into(), input_schema: obj(serde_json::json!({}), &[]) },
        ToolSpec { name: "forward".into(), description: "Go forward in browser history.".into(), input_schema: obj(serde_json::json!({}), &[]) },
        ToolSpec {
            name: "extract".into(),
            description: "Extract information from the current page's content.".into(),
            input_schema: obj(serde_json::json!({"description": {"type": "string"}}), &["description"]),
        },
        ToolSpec {
            name: "done".into(),
            description: "Declare the task complete with a final answer.".into(),
            input_schema: obj(serde_json::json!({"result": {"type": "string"}}), &["result"]),
        },
        ToolSpec {
            name: "abort".into(),
            description: "Declare the task cannot be completed.".into(),
            input_schema: obj(serde_json::json!({"description": {"type": "string"}}), &["description"]),
        },
    ]
}

/// The one search tool added to the catalog when a search service is
/// configured (§4.G step 4, §4.I step 4).
pub fn web_search_tool() -> ToolSpec {
    ToolSpec {
        name: "web_search".into(),
        description: "Search the web for information not visible on the current page.".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }),
    }
}

async fn publish(bus: &Arc<InMemoryBus<AgentEvent>>, event: AgentEvent) {
    let _ = bus.publish(event).await;
}

/// Run one full iteration of the Action Loop. `tools` is the web-action
/// catalog plus search tools, if a search service was started this task.
#[allow(clippy::too_many_arguments)]
pub async fn run_iteration(
    task_id: &TaskId,
    browser: &Arc<dyn Browser>,
    provider: &Arc<dyn LlmProvider>,
    compressor: &dyn SnapshotCompressor,
    bus: &Arc<InMemoryBus<AgentEvent>>,
    log: &mut MessageLog,
    state: &mut LoopState,
    max_repeated_actions: u32,
    vision: bool,
    extra_tools: &[ToolSpec],
    search: Option<&Arc<dyn SearchService>>,
    cancellation: Option<&CancellationToken>,
) -> Result<IterationOutcome, IterationError> {
    // Step 1.
    if cancellation.map(CancellationToken::is_cancelled).unwrap_or(false) {
        return Ok(IterationOutcome::Aborted {
            reason: "Task aborted by user".to_string(),
        });
    }

    // Step 2.
    let iteration_id = IterationId::new();
    publish(
        bus,
        AgentEvent::AgentStep { task_id: task_id.clone(), iteration_id: iteration_id.clone() },
    )
    .await;
    tracing::info!(task_id = %task_id, iteration_id = %iteration_id, "action loop iteration starting");

    // Step 3.
    if state.needs_page_snapshot {
        log.clip_prior_external_content();

        let snapshot = browser.get_tree_with_refs().await.map_err(|err| {
            RecoverableError::new(format!("failed to read page: {err}")).into()
        })?;
        let before_bytes = snapshot.tree.len();
        let compressed = compressor.compress(&snapshot.tree);
        let after_bytes = compressed.len();
        if after_bytes != before_bytes {
            publish(
                bus,
                AgentEvent::SystemDebugCompression {
                    task_id: task_id.clone(),
                    before_bytes,
                    after_bytes,
                    detail: Value::Null,
                },
            )
            .await;
        }
        let title = browser.get_title().await.unwrap_or_default();
        let url = browser.get_url().await.unwrap_or_default();

        if vision {
            match browser.get_screenshot(true).await {
                Ok(shot) => {
                    log.push(LogEntry::user_with_image(
                        snapshot_prompt(&compressed, &title, &url),
                        shot.jpeg_bytes,
                        "image/jpeg".to_string(),
                    ));
                    publish(bus, AgentEvent::BrowserScreenshotCaptured { task_id: task_id.clone() }).await;
                }
                Err(err) => {
                    tracing::warn!(task_id = %task_id, %err, "screenshot capture failed, falling back to text-only");
                    publish(
                        bus,
                        AgentEvent::AgentStatus {
                            task_id: task_id.clone(),
                            message: format!("screenshot capture failed: {err}"),
                        },
                    )
                    .await;
                    log.push(LogEntry::user(snapshot_prompt(&compressed, &title, &url)));
                }
            }
        } else {
            log.push(LogEntry::user(snapshot_prompt(&compressed, &title, &url)));
        }

        publish(bus, AgentEvent::BrowserNavigated { task_id: task_id.clone(), url }).await;
        state.needs_page_snapshot = false;
    }

    // Step 4.
    publish(
        bus,
        AgentEvent::AgentProcessing { task_id: task_id.clone(), iteration_id: iteration_id.clone() },
    )
    .await;

    let mut tools = web_action_tools();
    tools.extend_from_slice(extra_tools);

    let request = CompletionRequest {
        messages: log.entries().to_vec(),
        tools,
        tool_choice: ToolChoice::Required,
        max_output_tokens: 4096,
    };

    let mut handle = provider
        .stream(request, cancellation.cloned())
        .await
        .map_err(RecoverableError::from)?;

    let mut reasoning = String::new();
    let mut reasoning_emitted = false;
    while let Some(part) = handle.next_event().await {
        match &part {
            StreamPart::ReasoningDelta(delta) => reasoning.push_str(delta),
            StreamPart::ReasoningEnd | StreamPart::ToolInputStart { .. } | StreamPart::ToolCall { .. } => {
                if !reasoning_emitted && !reasoning.is_empty() {
                    publish(
                        bus,
                        AgentEvent::AgentReasoned {
                            task_id: task_id.clone(),
                            reasoning: reasoning.clone(),
                        },
                    )
                    .await;
                    reasoning_emitted = true;
                }
            }
            _ => {}
        }
    }
    let outcome = handle.finish().await;
    publish(
        bus,
        AgentEvent::AiGeneration {
            task_id: task_id.clone(),
            finish_reason: outcome.finish_reason.clone(),
        },
    )
    .await;

    if !reasoning.is_empty() {
        log.push(LogEntry::assistant(reasoning));
    }

    // Step 5 is folded into the `?` above (stream-start failure) — once the
    // stream is open, completion failure arrives as an empty tool-call list
    // (step 6).

    // Step 6.
    let Some(call) = outcome.tool_calls.into_iter().next() else {
        return Err(ToolExecutionError("You must use exactly one tool per turn.".to_string()).into());
    };

    log.push(LogEntry::assistant(format!(
        "called {} with {}",
        call.tool_name, call.input
    )));

    let validated = match tool_catalog::validate_call(&call.tool_name, &call.input) {
        Ok(v) => v,
        Err(result) => {
            log.push(LogEntry::tool(result.error.clone().unwrap_or_default()));
            return Err(ToolExecutionError(
                result.error.unwrap_or_else(|| "validation failed".to_string()),
            )
            .into());
        }
    };

    publish(
        bus,
        AgentEvent::AgentAction {
            task_id: task_id.clone(),
            action: call.tool_name.clone(),
            ref_: validated.ref_.as_ref().map(ElementRef::to_string),
        },
    )
    .await;

    let tool_result = dispatch(task_id, browser, bus, search, &call.tool_name, &call.input, &validated).await;

    log.push(LogEntry::tool(describe_tool_result(&tool_result)));

    // Step 7.
    if !tool_result.success {
        if tool_result.is_recoverable {
            return Err(ToolExecutionError(
                tool_result.error.unwrap_or_else(|| "tool call failed".to_string()),
            )
            .into());
        }
        return Err(RecoverableError::new(
            tool_result.error.unwrap_or_else(|| "tool call failed".to_string()),
        )
        .into());
    }

    if tool_result.is_terminal {
        return Ok(match tool_result.action.as_str() {
            "done" => IterationOutcome::ProposeDone {
                result: tool_result.result.unwrap_or_default(),
            },
            _ => IterationOutcome::Aborted {
                reason: tool_result.reason.unwrap_or_default(),
            },
        });
    }

    // `web_search` is not a `BrowserAction`; it still belongs to the
    // snapshot-skip set `{Extract, WebSearch}` since it never touches the
    // page (§4.G step 7).
    let skips_snapshot = tool_result.action == "web_search"
        || BrowserAction::from_tool_name(&tool_result.action)
            .map(BrowserAction::skips_next_snapshot)
            .unwrap_or(false);
    state.needs_page_snapshot = !skips_snapshot;

    // Step 8: repetition detection.
    let signature = format!(
        "{}:{}:{}",
        tool_result.action,
        tool_result.ref_.as_deref().unwrap_or(""),
        tool_result.value.as_deref().unwrap_or("")
    );
    if state.last_action_signature.as_deref() == Some(signature.as_str()) {
        state.action_repeat_count += 1;
    } else {
        state.action_repeat_count = 0;
        state.last_action_signature = Some(signature.clone());
    }

    if state.action_repeat_count == max_repeated_actions + 2 {
        return Ok(IterationOutcome::Aborted {
            reason: excessive_repetition_reason(&signature),
        });
    }
    if state.action_repeat_count == max_repeated_actions + 1 {
        log.push(LogEntry::user(repetition_warning_prompt(&signature)));
        state.needs_page_snapshot = true;
        return Ok(IterationOutcome::Continue { counted: false });
    }

    Ok(IterationOutcome::Continue { counted: true })
}

async fn dispatch(
    task_id: &TaskId,
    browser: &Arc<dyn Browser>,
    bus: &Arc<InMemoryBus<AgentEvent>>,
    search: Option<&Arc<dyn SearchService>>,
    tool_name: &str,
    input: &Value,
    validated: &tool_catalog::ValidatedCall,
) -> ToolResult {
    match tool_name {
        "done" => {
            let result = input.get("result").and_then(Value::as_str).unwrap_or_default();
            return ToolResult::done(result);
        }
        "abort" => {
            let reason = input.get("description").and_then(Value::as_str).unwrap_or_default();
            return ToolResult::abort(reason);
        }
        "extract" => {
            // Extraction is answered by the catalog via a second LLM call
            // over page content in a full implementation; the control loop
            // itself only needs the envelope shape, so a fixed placeholder
            // stands in here.
            let description = input
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            publish(
                bus,
                AgentEvent::AgentExtracted { task_id: task_id.clone(), description },
            )
            .await;
            return ToolResult {
                success: true,
                action: "extract".to_string(),
                extracted_data: Some(String::new()),
                ..Default::default()
            };
        }
        "web_search" => {
            let query = validated.value.clone().unwrap_or_default();
            return match search {
                Some(service) => match service.search(&query).await {
                    Ok(text) => ToolResult {
                        success: true,
                        action: "web_search".to_string(),
                        value: Some(query),
                        extracted_data: Some(text),
                        ..Default::default()
                    },
                    Err(err) => ToolResult {
                        success: false,
                        action: "web_search".to_string(),
                        value: Some(query),
                        error: Some(err.to_string()),
                        is_recoverable: true,
                        ..Default::default()
                    },
                },
                None => ToolResult::validation_failure("web_search", "no search service configured"),
            };
        }
        _ => {}
    }

    let Some(browser_action) = validated.browser_action else {
        return ToolResult::validation_failure(tool_name, "no browser action resolved");
    };

    publish(
        bus,
        AgentEvent::BrowserActionStarted {
            task_id: task_id.clone(),
            action: tool_name.to_string(),
        },
    )
    .await;

    let result = browser
        .perform_action(validated.ref_.as_ref(), browser_action, validated.value.as_deref())
        .await;

    if browser_action == BrowserAction::Wait {
        let seconds: u64 = validated
            .value
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        publish(bus, AgentEvent::AgentWaiting { task_id: task_id.clone(), seconds }).await;
        let _ = browser.wait_for_load_state(LoadState::NetworkIdle, Some(5_000)).await;
    }

    let success = result.is_ok();
    publish(
        bus,
        AgentEvent::BrowserActionCompleted {
            task_id: task_id.clone(),
            action: tool_name.to_string(),
            success,
        },
    )
    .await;

    match result {
        Ok(()) => ToolResult {
            success: true,
            action: tool_name.to_string(),
            ref_: validated.ref_.as_ref().map(ElementRef::to_string),
            value: validated.value.clone(),
            ..Default::default()
        },
        Err(err) => ToolResult {
            success: false,
            action: tool_name.to_string(),
            ref_: validated.ref_.as_ref().map(ElementRef::to_string),
            value: validated.value.clone(),
            error: Some(err.to_string()),
            is_recoverable: err.is_recoverable(),
            ..Default::default()
        },
    }
}

fn describe_tool_result(result: &ToolResult) -> String {
    if let Some(err) = &result.error {
        format!("{{\"success\":false,\"action\":\"{}\",\"error\":\"{}\"}}", result.action, err)
    } else if let Some(value) = &result.result {
        format!("{{\"success\":true,\"action\":\"{}\",\"result\":\"{}\"}}", result.action, value)
    } else {
        format!("{{\"success\":true,\"action\":\"{}\"}}", result.action)
    }
}

impl BrowserAction {
    fn from_tool_name(name: &str) -> Option<Self> {
        Some(match name {
            "click" => BrowserAction::Click,
            "hover" => BrowserAction::Hover,
            "fill" => BrowserAction::Fill,
            "fill_and_enter" => BrowserAction::FillAndEnter,
            "focus" => BrowserAction::Focus,
            "check" => BrowserAction::Check,
            "uncheck" => BrowserAction::Uncheck,
            "select" => BrowserAction::Select,
            "enter" => BrowserAction::Enter,
            "wait" => BrowserAction::Wait,
            "goto" => BrowserAction::Goto,
            "back" => BrowserAction::Back,
            "forward" => BrowserAction::Forward,
            "extract" => BrowserAction::Extract,
            "done" => BrowserAction::Done,
            "abort" => BrowserAction::Abort,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockBrowser;
    use crate::llm_provider::{MockLlmProvider, ScriptedResponse};
    use serde_json::json;

    fn bus() -> Arc<InMemoryBus<AgentEvent>> {
        InMemoryBus::new(32)
    }

    #[tokio::test]
    async fn done_call_produces_propose_done_outcome() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("done", json!({"result": "Example Domain"})),
        ));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState::starting("https://example.com");
        let bus = bus();

        let outcome = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();

        match outcome {
            IterationOutcome::ProposeDone { result } => assert_eq!(result, "Example Domain"),
            other => panic!("expected ProposeDone, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_open_failure_is_a_recoverable_error() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![]));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState::starting("https://example.com");
        let bus = bus();

        let err = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IterationError::Recoverable(_)));
    }

    #[tokio::test]
    async fn empty_turn_with_no_tool_call_is_a_tool_error() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        let provider: Arc<dyn LlmProvider> =
            Arc::new(MockLlmProvider::single(ScriptedResponse::no_tool_call()));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState::starting("https://example.com");
        let bus = bus();

        let err = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IterationError::Tool(_)));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_any_browser_call() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![]));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState::starting("https://example.com");
        let bus = bus();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            Some(&token),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, IterationOutcome::Aborted { .. }));
    }

    #[tokio::test]
    async fn repetition_reaches_warning_then_abort_threshold() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        browser.get_tree_with_refs().await.unwrap();
        let bus = bus();
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState {
            needs_page_snapshot: false,
            last_action_signature: Some("click:s1e1:".to_string()),
            action_repeat_count: 2, // one click below the max_repeated_actions=2 warning bound
        };

        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("click", json!({"ref": "s1e1"})),
        ));
        let outcome = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, IterationOutcome::Continue { counted: false }));
        assert_eq!(state.action_repeat_count, 3);
        assert!(state.needs_page_snapshot);

        state.needs_page_snapshot = false;
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("click", json!({"ref": "s1e1"})),
        ));
        let outcome = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, IterationOutcome::Aborted { .. }));
    }

    #[tokio::test]
    async fn web_search_tool_dispatches_to_configured_service_and_skips_snapshot() {
        use crate::search::test_support::StubSearchService;

        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        browser.get_tree_with_refs().await.unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("web_search", json!({"query": "rust async runtimes"})),
        ));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState { needs_page_snapshot: false, last_action_signature: None, action_repeat_count: 0 };
        let bus = bus();
        let search: Arc<dyn SearchService> =
            Arc::new(StubSearchService { response: "tokio is the most common".to_string() });

        let outcome = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[web_search_tool()],
            Some(&search),
            None,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, IterationOutcome::Continue { counted: true }));
        assert!(!state.needs_page_snapshot);
    }

    #[tokio::test]
    async fn web_search_without_a_configured_service_fails_recoverably() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        browser.get_tree_with_refs().await.unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("web_search", json!({"query": "rust async runtimes"})),
        ));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState { needs_page_snapshot: false, last_action_signature: None, action_repeat_count: 0 };
        let bus = bus();

        let err = run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[web_search_tool()],
            None,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IterationError::Tool(_)));
    }

    #[tokio::test]
    async fn wait_and_extract_publish_their_events() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        browser.get_tree_with_refs().await.unwrap();
        let bus = bus();
        let mut rx = bus.subscribe();

        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("wait", json!({"seconds": 2})),
        ));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState { needs_page_snapshot: false, last_action_signature: None, action_repeat_count: 0 };
        run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();

        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("extract", json!({"description": "the page title"})),
        ));
        run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();

        let mut saw_waiting = false;
        let mut saw_extracted = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::AgentWaiting { seconds, .. } => {
                    assert_eq!(seconds, 2);
                    saw_waiting = true;
                }
                AgentEvent::AgentExtracted { description, .. } => {
                    assert_eq!(description, "the page title");
                    saw_extracted = true;
                }
                _ => {}
            }
        }
        assert!(saw_waiting);
        assert!(saw_extracted);
    }

    #[tokio::test]
    async fn compression_that_shrinks_the_snapshot_publishes_debug_event() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        let bus = bus();
        let mut rx = bus.subscribe();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("done", json!({"result": "done"})),
        ));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState::starting("https://example.com");
        let compressor = crate::snapshot_compressor::TruncatingCompressor::new(5);

        run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &compressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();

        let mut saw_compression = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::SystemDebugCompression { before_bytes, after_bytes, .. } = event {
                assert!(after_bytes < before_bytes);
                saw_compression = true;
            }
        }
        assert!(saw_compression);
    }

    #[tokio::test]
    async fn passthrough_compression_does_not_publish_debug_event() {
        let browser: Arc<dyn Browser> = Arc::new(MockBrowser::single_page("https://example.com", "Example", 3));
        browser.start().await.unwrap();
        let bus = bus();
        let mut rx = bus.subscribe();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("done", json!({"result": "done"})),
        ));
        let mut log = MessageLog::seed("sys", "task");
        let mut state = LoopState::starting("https://example.com");

        run_iteration(
            &TaskId::new(),
            &browser,
            &provider,
            &crate::snapshot_compressor::PassthroughCompressor,
            &bus,
            &mut log,
            &mut state,
            2,
            false,
            &[],
            None,
            None,
        )
        .await
        .unwrap();

        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, AgentEvent::SystemDebugCompression { .. }));
        }
    }
}
