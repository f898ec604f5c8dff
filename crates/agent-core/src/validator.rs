//! Component F: grades a proposed `done` result against the plan's success
//! criteria before the Action Loop is allowed to terminate successfully.

use std::sync::Arc;

use serde_json::Value;

use crate::llm_provider::{CompletionRequest, LlmProvider, ToolChoice, ToolSpec};
use crate::message_log::{MessageLog, Role};

const MAX_VALIDATOR_ATTEMPTS: u32 = 2;
const HISTORY_TAIL: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionQuality {
    Failed,
    Partial,
    Complete,
    Excellent,
}

impl CompletionQuality {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "failed" => Some(Self::Failed),
            "partial" => Some(Self::Partial),
            "complete" => Some(Self::Complete),
            "excellent" => Some(Self::Excellent),
            _ => None,
        }
    }

    fn is_accepting(self) -> bool {
        matches!(self, CompletionQuality::Complete | CompletionQuality::Excellent)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub quality: CompletionQuality,
    pub feedback: Option<String>,
}

fn validate_task_tool() -> ToolSpec {
    ToolSpec {
        name: "validate_task".to_string(),
        description: "Grade whether the proposed answer satisfies the task's success criteria.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "task_assessment": {"type": "string"},
                "completion_quality": {"type": "string", "enum": ["failed", "partial", "complete", "excellent"]},
                "feedback": {"type": "string"}
            },
            "required": ["task_assessment", "completion_quality"]
        }),
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Run one Validator LLM call. The caller is responsible for counting
/// attempts against `max_validation_attempts` and for force-accepting once
/// that bound is hit (§4.F) — this function only ever reports what the
/// model said.
pub async fn validate(
    provider: &Arc<dyn LlmProvider>,
    task_text: &str,
    success_criteria: &str,
    proposed_answer: &str,
    log: &MessageLog,
) -> ValidationOutcome {
    let history = log
        .tail_as_text(HISTORY_TAIL)
        .into_iter()
        .map(|(role, text)| format!("{}: {}", role_label(role), text))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "You are the validation stage of a web automation agent.\nTask: {task_text}\nSuccess criteria: {success_criteria}\n\nRecent history:\n{history}"
    );

    let request = CompletionRequest {
        messages: vec![
            crate::message_log::LogEntry::system(system),
            crate::message_log::LogEntry::user(format!("Proposed answer: {proposed_answer}")),
        ],
        tools: vec![validate_task_tool()],
        tool_choice: ToolChoice::Required,
        max_output_tokens: 1024,
    };

    for _attempt in 0..MAX_VALIDATOR_ATTEMPTS {
        match provider.stream(request.clone(), None).await {
            Ok(handle) => {
                let outcome = handle.finish().await;
                if let Some(call) = outcome.tool_calls.into_iter().next() {
                    return outcome_from_input(&call.input);
                }
            }
            Err(_) => continue,
        }
    }

    ValidationOutcome {
        accepted: false,
        quality: CompletionQuality::Failed,
        feedback: Some("validator call failed".to_string()),
    }
}

fn outcome_from_input(input: &Value) -> ValidationOutcome {
    let quality = input
        .get("completion_quality")
        .and_then(Value::as_str)
        .and_then(CompletionQuality::from_str)
        .unwrap_or(CompletionQuality::Failed);
    let feedback = input
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::to_string);

    ValidationOutcome {
        accepted: quality.is_accepting(),
        quality,
        feedback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_provider::{MockLlmProvider, ScriptedResponse};
    use serde_json::json;

    #[tokio::test]
    async fn complete_quality_is_accepted() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call(
                "validate_task",
                json!({"task_assessment": "good", "completion_quality": "complete"}),
            ),
        ));
        let log = MessageLog::seed("sys", "task");
        let outcome = validate(&provider, "task", "criteria", "answer", &log).await;
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn partial_quality_is_rejected_with_feedback() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call(
                "validate_task",
                json!({
                    "task_assessment": "empty",
                    "completion_quality": "partial",
                    "feedback": "answer is empty"
                }),
            ),
        ));
        let log = MessageLog::seed("sys", "task");
        let outcome = validate(&provider, "task", "criteria", "", &log).await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.feedback.as_deref(), Some("answer is empty"));
    }
}
