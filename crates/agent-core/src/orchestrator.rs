//! Component I: the public `execute` entrypoint that composes every other
//! component (§4.I).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use webloop_core_types::TaskId;
use webloop_event_bus::{EventBus, InMemoryBus};

use crate::action_loop::prompt::ACTION_LOOP_SYSTEM_PROMPT;
use crate::action_loop::{self, IterationOutcome, LoopState};
use crate::browser::Browser;
use crate::config::AgentOptions;
use crate::errors::{IterationError, SetupError};
use crate::events::AgentEvent;
use crate::failure_governor::{self, FailureCounters, GovernorOutcome};
use crate::llm_provider::ToolSpec;
use crate::message_log::MessageLog;
use crate::planner::{self, Plan};
use crate::snapshot_compressor::{PassthroughCompressor, SnapshotCompressor};
use crate::validator;

/// Immutable per-task input (§3 "Task input").
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task_text: String,
    pub starting_url: Option<String>,
    pub data: Option<Value>,
    pub guardrails: Option<String>,
    pub cancellation: Option<CancellationToken>,
}

impl TaskInput {
    pub fn new(task_text: impl Into<String>) -> Self {
        Self {
            task_text: task_text.into(),
            starting_url: None,
            data: None,
            guardrails: None,
            cancellation: None,
        }
    }

    pub fn with_starting_url(mut self, url: impl Into<String>) -> Self {
        self.starting_url = Some(url.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionStats {
    pub iterations: u32,
    pub actions: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TaskExecutionResult {
    pub success: bool,
    pub final_answer: Option<String>,
    pub error: Option<TaskError>,
    pub stats: ExecutionStats,
}

impl TaskExecutionResult {
    fn success(answer: String, iterations: u32, actions: u32, elapsed: Duration) -> Self {
        Self {
            success: true,
            final_answer: Some(answer),
            error: None,
            stats: ExecutionStats {
                iterations,
                actions,
                duration_ms: elapsed.as_millis() as u64,
            },
        }
    }

    fn failure(code: &'static str, message: String, iterations: u32, actions: u32, elapsed: Duration) -> Self {
        Self {
            success: false,
            final_answer: Some(message.clone()),
            error: Some(TaskError { code, message }),
            stats: ExecutionStats {
                iterations,
                actions,
                duration_ms: elapsed.as_millis() as u64,
            },
        }
    }
}

/// Public entrypoint. Owns the message log, execution state, plan, and
/// current iteration id exclusively for the duration of one [`execute`]
/// call; the browser is shared with the caller and is only shut down by
/// [`close`] (§3 "Ownership").
pub struct Agent {
    browser: Arc<dyn Browser>,
    options: AgentOptions,
    bus: Arc<InMemoryBus<AgentEvent>>,
    compressor: Arc<dyn SnapshotCompressor>,
    closed: AtomicBool,
}

impl Agent {
    pub fn new(browser: Arc<dyn Browser>, options: AgentOptions) -> Self {
        Self {
            browser,
            options,
            bus: InMemoryBus::new(256),
            compressor: Arc::new(PassthroughCompressor),
            closed: AtomicBool::new(false),
        }
    }

    /// Like [`Agent::new`], but publishes onto a caller-owned bus instead of
    /// a private one — the caller's own subscribers observe the same events
    /// returned by [`Agent::subscribe`] (§6 `eventEmitter`).
    pub fn with_bus(browser: Arc<dyn Browser>, options: AgentOptions, bus: Arc<InMemoryBus<AgentEvent>>) -> Self {
        Self {
            browser,
            options,
            bus,
            compressor: Arc::new(PassthroughCompressor),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn SnapshotCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.bus.subscribe()
    }

    pub async fn execute(&self, task: TaskInput) -> Result<TaskExecutionResult, SetupError> {
        let task_id = TaskId::new();
        let span = tracing::info_span!("agent.execute", task_id = %task_id);
        self.execute_inner(task_id, task).instrument(span).await
    }

    async fn execute_inner(
        &self,
        task_id: TaskId,
        task: TaskInput,
    ) -> Result<TaskExecutionResult, SetupError> {
        let start = Instant::now();

        // Step 1.
        if task.task_text.trim().is_empty() {
            return Err(SetupError::EmptyTask);
        }
        if let Some(url) = &task.starting_url {
            Url::parse(url).map_err(|_| SetupError::InvalidStartingUrl(url.clone()))?;
        }

        // Step 3.
        self.publish(AgentEvent::TaskSetup { task_id: task_id.clone() }).await;
        self.browser.start().await?;

        // Step 4.
        if self.options.search_provider == crate::config::SearchProvider::ParallelApi
            && self.options.search_api_key.is_none()
        {
            return Err(SetupError::MissingSearchKey);
        }
        let search_available = self.options.search_provider != crate::config::SearchProvider::None;
        if search_available && self.options.search_service.is_none() {
            return Err(SetupError::SearchServiceNotConfigured);
        }
        let extra_tools: Vec<ToolSpec> = if search_available {
            vec![action_loop::web_search_tool()]
        } else {
            Vec::new()
        };

        // Step 5.
        let plan = planner::plan(
            &self.options.provider,
            &task.task_text,
            task.starting_url.as_deref(),
            task.guardrails.as_deref().or(self.options.guardrails.as_deref()),
            search_available,
        )
        .await?;

        if plan.starting_url.is_empty() {
            return Err(SetupError::NoStartingUrl);
        }

        // Step 6: navigate with bounded restart retry.
        self.navigate_to_start(&task_id, &plan).await?;

        // Step 7: seed the message log.
        let mut log = MessageLog::seed(
            ACTION_LOOP_SYSTEM_PROMPT,
            task_and_plan_prompt(&task, &plan),
        );

        // Step 8: run the loop.
        let (result, _iterations, _actions) =
            self.run_loop(&task_id, &task, &plan, &mut log, start, &extra_tools).await;

        // Step 9.
        self.publish(AgentEvent::TaskCompleted { task_id: task_id.clone(), success: result.success })
            .await;

        Ok(result)
    }

    async fn navigate_to_start(&self, task_id: &TaskId, plan: &Plan) -> Result<(), SetupError> {
        let attempts = 1 + self.options.initial_navigation_retries;
        let mut last_err = None;
        for _attempt in 0..attempts {
            let outcome: Result<(), crate::browser::BrowserError> = async {
                if plan.starting_url != "about:blank" {
                    self.browser.goto(&plan.starting_url).await?;
                }
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => {
                    let url = self.browser.get_url().await.unwrap_or_default();
                    self.publish(AgentEvent::TaskStarted { task_id: task_id.clone(), url }).await;
                    return Ok(());
                }
                Err(err) if err.is_recoverable() => {
                    last_err = Some(err);
                    let _ = self.browser.shutdown().await;
                    self.browser.start().await?;
                }
                Err(err) => return Err(SetupError::Browser(err)),
            }
        }
        Err(SetupError::Browser(last_err.expect("at least one attempt runs")))
    }

    async fn run_loop(
        &self,
        task_id: &TaskId,
        task: &TaskInput,
        plan: &Plan,
        log: &mut MessageLog,
        start: Instant,
        extra_tools: &[ToolSpec],
    ) -> (TaskExecutionResult, u32, u32) {
        let mut state = LoopState::starting(&plan.starting_url);
        let mut counters = FailureCounters::default();
        let mut iterations = 0u32;
        let mut actions = 0u32;
        let mut validation_attempts = 0u32;

        loop {
            if iterations >= self.options.max_iterations {
                return (
                    TaskExecutionResult::failure(
                        "MAX_ITERATIONS",
                        "Maximum iterations reached without completing the task.".to_string(),
                        iterations,
                        actions,
                        start.elapsed(),
                    ),
                    iterations,
                    actions,
                );
            }
            iterations += 1;

            let outcome = action_loop::run_iteration(
                task_id,
                &self.browser,
                &self.options.provider,
                self.compressor.as_ref(),
                &self.bus,
                log,
                &mut state,
                self.options.max_repeated_actions,
                self.options.vision,
                extra_tools,
                self.options.search_service.as_ref(),
                task.cancellation.as_ref(),
            )
            .await;

            match outcome {
                Ok(IterationOutcome::Continue { counted }) => {
                    counters.record_success();
                    if counted {
                        actions += 1;
                    }
                    continue;
                }
                Ok(IterationOutcome::Aborted { reason }) => {
                    self.publish(AgentEvent::TaskAborted { task_id: task_id.clone(), reason: reason.clone() })
                        .await;
                    return (
                        TaskExecutionResult::failure(
                            "TASK_ABORTED",
                            reason,
                            iterations,
                            actions,
                            start.elapsed(),
                        ),
                        iterations,
                        actions,
                    );
                }
                Ok(IterationOutcome::ProposeDone { result }) => {
                    actions += 1;
                    validation_attempts += 1;
                    let verdict = validator::validate(
                        &self.options.provider,
                        &task.task_text,
                        &plan.success_criteria,
                        &result,
                        log,
                    )
                    .await;

                    self.publish(AgentEvent::TaskValidated {
                        task_id: task_id.clone(),
                        attempt: validation_attempts,
                    })
                    .await;

                    if verdict.accepted {
                        counters.record_success();
                        return (
                            TaskExecutionResult::success(result, iterations, actions, start.elapsed()),
                            iterations,
                            actions,
                        );
                    }

                    if validation_attempts >= self.options.max_validation_attempts {
                        counters.record_success();
                        self.publish(AgentEvent::AgentStatus {
                            task_id: task_id.clone(),
                            message: "validator override: forcing accept at max validation attempts"
                                .to_string(),
                        })
                        .await;
                        return (
                            TaskExecutionResult::success(result, iterations, actions, start.elapsed()),
                            iterations,
                            actions,
                        );
                    }

                    let feedback = verdict
                        .feedback
                        .unwrap_or_else(|| "The proposed answer did not satisfy the task.".to_string());
                    self.publish(AgentEvent::TaskValidationError {
                        task_id: task_id.clone(),
                        feedback: feedback.clone(),
                    })
                    .await;
                    log.push(crate::message_log::LogEntry::user(feedback));
                    continue;
                }
                Err(err) => {
                    let governed = failure_governor::classify(
                        &err,
                        &mut counters,
                        self.options.max_consecutive_errors,
                        self.options.max_total_errors,
                        self.options.guardrails.is_some(),
                        search_provider_is_some(&self.options),
                    );
                    self.publish(AgentEvent::AiGenerationError {
                        task_id: task_id.clone(),
                        is_tool_error: matches!(err, IterationError::Tool(_)),
                        message: err.to_string(),
                    })
                    .await;

                    match governed {
                        GovernorOutcome::Continue { append_message, .. } => {
                            if let Some(message) = append_message {
                                log.push(message);
                            }
                            continue;
                        }
                        GovernorOutcome::Terminate { code } => {
                            let message = format!("Task failed: {err}");
                            return (
                                TaskExecutionResult::failure(
                                    code,
                                    message,
                                    iterations,
                                    actions,
                                    start.elapsed(),
                                ),
                                iterations,
                                actions,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Dispose the Event Bus listener registry and shut down the browser.
    /// Idempotent (§8 invariant 8): a second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.browser.shutdown().await;
    }

    async fn publish(&self, event: AgentEvent) {
        let _ = self.bus.publish(event).await;
    }
}

fn search_provider_is_some(options: &AgentOptions) -> bool {
    options.search_provider != crate::config::SearchProvider::None
}

fn task_and_plan_prompt(task: &TaskInput, plan: &Plan) -> String {
    let mut prompt = format!(
        "Task: {}\n\nPlan: {}\n\nSuccess criteria: {}",
        task.task_text, plan.narrative, plan.success_criteria
    );
    if let Some(data) = &task.data {
        prompt.push_str(&format!("\n\nStructured data: {data}"));
    }
    if let Some(guardrails) = &task.guardrails {
        prompt.push_str(&format!("\n\nGuardrails: {guardrails}"));
    }
    if let Some(items) = &plan.action_items {
        if !items.is_empty() {
            prompt.push_str("\n\nSuggested action items:\n");
            for item in items {
                prompt.push_str(&format!("- {item}\n"));
            }
        }
    }
    prompt
}
