//! Component E: the one-shot planning call that precedes the Action Loop.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::SetupError;
use crate::llm_provider::{
    CompletionRequest, LlmProvider, ToolChoice, ToolSpec,
};
use crate::message_log::LogEntry;

const MAX_PLANNING_ATTEMPTS: u32 = 3;

/// The immutable artifact produced once per task (§3).
#[derive(Debug, Clone)]
pub struct Plan {
    pub narrative: String,
    pub success_criteria: String,
    pub starting_url: String,
    pub action_items: Option<Vec<String>>,
}

fn create_plan_tool() -> ToolSpec {
    ToolSpec {
        name: "create_plan".to_string(),
        description: "Produce a narrative plan, success criteria, and an optional starting url and action items for completing the task.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "success_criteria": {"type": "string"},
                "plan": {"type": "string"},
                "url": {"type": "string"},
                "action_items": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["success_criteria", "plan"]
        }),
    }
}

fn planning_system_prompt(guardrails: Option<&str>, search_available: bool) -> String {
    let mut prompt = String::from(
        "You are the planning stage of a web automation agent. Given a task, \
         call create_plan exactly once with a narrative plan and success criteria.",
    );
    if search_available {
        prompt.push_str(" A web search tool will be available during execution.");
    }
    if let Some(g) = guardrails {
        prompt.push_str(&format!("\nGuardrails: {g}"));
    }
    prompt
}

/// Run the planning call, retrying transport errors up to
/// `MAX_PLANNING_ATTEMPTS` times (§4.E). `user_supplied_url` wins over
/// whatever the planner emits; absent both, the caller resolves to
/// `about:blank`.
pub async fn plan(
    provider: &Arc<dyn LlmProvider>,
    task_text: &str,
    user_supplied_url: Option<&str>,
    guardrails: Option<&str>,
    search_available: bool,
) -> Result<Plan, SetupError> {
    let request = CompletionRequest {
        messages: vec![
            LogEntry::system(planning_system_prompt(guardrails, search_available)),
            LogEntry::user(task_text.to_string()),
        ],
        tools: vec![create_plan_tool()],
        tool_choice: ToolChoice::Required,
        max_output_tokens: 2048,
    };

    let mut last_error = None;
    for _attempt in 0..MAX_PLANNING_ATTEMPTS {
        let request = request.clone();
        match provider.stream(request, None).await {
            Ok(handle) => {
                let outcome = handle.finish().await;
                let Some(call) = outcome.tool_calls.into_iter().next() else {
                    last_error = Some("planner did not call create_plan".to_string());
                    continue;
                };
                return Ok(build_plan(&call.input, user_supplied_url));
            }
            Err(err) => {
                last_error = Some(err.to_string());
            }
        }
    }

    Err(SetupError::Planning(
        last_error.unwrap_or_else(|| "planning exhausted retries".to_string()),
    ))
}

fn build_plan(input: &Value, user_supplied_url: Option<&str>) -> Plan {
    let narrative = input
        .get("plan")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let success_criteria = input
        .get("success_criteria")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let planner_url = input.get("url").and_then(Value::as_str);
    let starting_url = user_supplied_url
        .or(planner_url)
        .unwrap_or("about:blank")
        .to_string();
    let action_items = input.get("action_items").and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    });

    Plan {
        narrative,
        success_criteria,
        starting_url,
        action_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_provider::{MockLlmProvider, ScriptedResponse};
    use serde_json::json;

    #[tokio::test]
    async fn user_supplied_url_wins_over_planner_url() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call(
                "create_plan",
                json!({"success_criteria": "c", "plan": "p", "url": "https://planner.example"}),
            ),
        ));
        let plan = plan(&provider, "do thing", Some("https://user.example"), None, false)
            .await
            .unwrap();
        assert_eq!(plan.starting_url, "https://user.example");
    }

    #[tokio::test]
    async fn missing_urls_resolve_to_about_blank() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::single(
            ScriptedResponse::tool_call("create_plan", json!({"success_criteria": "c", "plan": "p"})),
        ));
        let plan = plan(&provider, "do thing", None, None, false).await.unwrap();
        assert_eq!(plan.starting_url, "about:blank");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_setup_error() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![
            Err(crate::llm_provider::ProviderError::Network("down".into())),
            Err(crate::llm_provider::ProviderError::Network("down".into())),
            Err(crate::llm_provider::ProviderError::Network("down".into())),
        ]));
        let result = plan(&provider, "do thing", None, None, false).await;
        assert!(matches!(result, Err(SetupError::Planning(_))));
    }
}
