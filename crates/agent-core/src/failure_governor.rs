//! Component H: error classification, counters, and the bounded-retry
//! termination rules layered over the Action Loop.

use crate::errors::{IterationError, RecoverableError, ToolExecutionError};
use crate::message_log::LogEntry;

/// What the Action Loop should do after the governor has classified and
/// counted one iteration's error.
#[derive(Debug, Clone)]
pub enum GovernorOutcome {
    /// Continue the loop. `append_message`, if present, must be pushed onto
    /// the log by the caller (kept out of this module so the governor has
    /// no log-ownership of its own — the Orchestrator owns the log).
    Continue { append_message: Option<LogEntry>, force_snapshot: bool },
    Terminate { code: &'static str },
}

/// Per-task error counters the Orchestrator threads through the loop.
#[derive(Debug, Clone, Default)]
pub struct FailureCounters {
    pub consecutive_errors: u32,
    pub total_errors: u32,
}

impl FailureCounters {
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    fn record_error(&mut self) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
    }
}

/// Classify one caught `IterationError`, update the counters, and decide
/// whether the loop may continue (§4.H, §7).
pub fn classify(
    error: &IterationError,
    counters: &mut FailureCounters,
    max_consecutive_errors: u32,
    max_total_errors: u32,
    guardrails_active: bool,
    search_available: bool,
) -> GovernorOutcome {
    // HTTP 4xx except 429 is non-recoverable regardless of error shape.
    if let Some(status) = error.http_status() {
        if (400..500).contains(&status) && status != 429 {
            return GovernorOutcome::Terminate { code: "TASK_FAILED" };
        }
    }

    counters.record_error();

    let append_message = match error {
        IterationError::Tool(ToolExecutionError(_)) => None,
        IterationError::Recoverable(RecoverableError { message, .. }) => {
            Some(LogEntry::user(step_error_prompt(
                message,
                guardrails_active,
                search_available,
            )))
        }
    };

    if counters.consecutive_errors >= max_consecutive_errors || counters.total_errors >= max_total_errors {
        return GovernorOutcome::Terminate { code: "MAX_ERRORS" };
    }

    GovernorOutcome::Continue {
        append_message,
        force_snapshot: false,
    }
}

fn step_error_prompt(message: &str, guardrails_active: bool, search_available: bool) -> String {
    let mut prompt = format!("The previous action failed: {message}\nTry a different approach.");
    if guardrails_active {
        prompt.push_str(" Remember to respect the guardrails given at the start of this task.");
    }
    if search_available {
        prompt.push_str(" You may use the search tool if it would help.");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_execution_error_does_not_append_a_message() {
        let mut counters = FailureCounters::default();
        let outcome = classify(
            &IterationError::Tool(ToolExecutionError("ref miss".to_string())),
            &mut counters,
            3,
            10,
            false,
            false,
        );
        match outcome {
            GovernorOutcome::Continue { append_message, .. } => assert!(append_message.is_none()),
            other => panic!("expected Continue, got {other:?}"),
        }
        assert_eq!(counters.total_errors, 1);
    }

    #[test]
    fn recoverable_error_appends_a_message() {
        let mut counters = FailureCounters::default();
        let outcome = classify(
            &IterationError::Recoverable(RecoverableError::new("boom")),
            &mut counters,
            3,
            10,
            false,
            false,
        );
        match outcome {
            GovernorOutcome::Continue { append_message, .. } => assert!(append_message.is_some()),
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn http_401_is_non_recoverable() {
        let mut counters = FailureCounters::default();
        let outcome = classify(
            &IterationError::Recoverable(RecoverableError::with_status("unauthorized", 401)),
            &mut counters,
            3,
            10,
            false,
            false,
        );
        assert!(matches!(
            outcome,
            GovernorOutcome::Terminate { code: "TASK_FAILED" }
        ));
    }

    #[test]
    fn http_429_remains_recoverable() {
        let mut counters = FailureCounters::default();
        let outcome = classify(
            &IterationError::Recoverable(RecoverableError::with_status("rate limited", 429)),
            &mut counters,
            3,
            10,
            false,
            false,
        );
        assert!(matches!(outcome, GovernorOutcome::Continue { .. }));
    }

    #[test]
    fn consecutive_errors_reach_max_errors_termination() {
        let mut counters = FailureCounters::default();
        for _ in 0..2 {
            classify(
                &IterationError::Recoverable(RecoverableError::new("boom")),
                &mut counters,
                3,
                10,
                false,
                false,
            );
        }
        let outcome = classify(
            &IterationError::Recoverable(RecoverableError::new("boom")),
            &mut counters,
            3,
            10,
            false,
            false,
        );
        assert!(matches!(
            outcome,
            GovernorOutcome::Terminate { code: "MAX_ERRORS" }
        ));
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let mut counters = FailureCounters::default();
        counters.consecutive_errors = 2;
        counters.record_success();
        assert_eq!(counters.consecutive_errors, 0);
    }
}
