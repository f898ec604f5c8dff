//! Component K: the single configuration surface for an [`crate::orchestrator::Agent`].
//!
//! Env/file layering is a caller concern (§1, §4.K) — this crate only owns
//! the struct, its conservative defaults, and its builder, the way the
//! teacher's `AgentLoopConfig`/`PlannerConfig` do for their own loops.

use std::sync::Arc;

use crate::llm_provider::LlmProvider;
use crate::search::SearchService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProvider {
    None,
    ParallelApi,
}

impl Default for SearchProvider {
    fn default() -> Self {
        SearchProvider::None
    }
}

/// Runtime configuration for one [`crate::orchestrator::Agent`]. Construct
/// via [`AgentOptionsBuilder`]; a caller who only supplies `provider` gets a
/// runnable agent from the defaults alone.
#[derive(Clone)]
pub struct AgentOptions {
    pub provider: Arc<dyn LlmProvider>,
    pub debug: bool,
    pub vision: bool,
    pub max_iterations: u32,
    pub max_consecutive_errors: u32,
    pub max_total_errors: u32,
    pub max_validation_attempts: u32,
    pub max_repeated_actions: u32,
    pub initial_navigation_retries: u32,
    pub guardrails: Option<String>,
    pub search_provider: SearchProvider,
    pub search_api_key: Option<String>,
    pub search_service: Option<Arc<dyn SearchService>>,
}

impl AgentOptions {
    pub fn builder(provider: Arc<dyn LlmProvider>) -> AgentOptionsBuilder {
        AgentOptionsBuilder::new(provider)
    }
}

/// Builder for [`AgentOptions`]. Numeric defaults are deliberately
/// conservative and finite, matching the teacher's own loop-config
/// defaults (bounded steps, bounded consecutive failures).
pub struct AgentOptionsBuilder {
    provider: Arc<dyn LlmProvider>,
    debug: bool,
    vision: bool,
    max_iterations: u32,
    max_consecutive_errors: u32,
    max_total_errors: u32,
    max_validation_attempts: u32,
    max_repeated_actions: u32,
    initial_navigation_retries: u32,
    guardrails: Option<String>,
    search_provider: SearchProvider,
    search_api_key: Option<String>,
    search_service: Option<Arc<dyn SearchService>>,
}

impl AgentOptionsBuilder {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            debug: false,
            vision: true,
            max_iterations: 50,
            max_consecutive_errors: 3,
            max_total_errors: 10,
            max_validation_attempts: 2,
            max_repeated_actions: 2,
            initial_navigation_retries: 2,
            guardrails: None,
            search_provider: SearchProvider::None,
            search_api_key: None,
            search_service: None,
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    pub fn max_iterations(mut self, value: u32) -> Self {
        self.max_iterations = value;
        self
    }

    pub fn max_consecutive_errors(mut self, value: u32) -> Self {
        self.max_consecutive_errors = value;
        self
    }

    pub fn max_total_errors(mut self, value: u32) -> Self {
        self.max_total_errors = value;
        self
    }

    pub fn max_validation_attempts(mut self, value: u32) -> Self {
        self.max_validation_attempts = value;
        self
    }

    pub fn max_repeated_actions(mut self, value: u32) -> Self {
        self.max_repeated_actions = value;
        self
    }

    pub fn initial_navigation_retries(mut self, value: u32) -> Self {
        self.initial_navigation_retries = value;
        self
    }

    pub fn guardrails(mut self, text: impl Into<String>) -> Self {
        self.guardrails = Some(text.into());
        self
    }

    pub fn search_provider(mut self, provider: SearchProvider, api_key: Option<String>) -> Self {
        self.search_provider = provider;
        self.search_api_key = api_key;
        self
    }

    /// Supply the concrete search backend the `web_search` tool dispatches
    /// to. A real HTTP-backed implementation is a caller concern (§1); this
    /// crate only consumes the trait object once one is configured.
    pub fn search_service(mut self, service: Arc<dyn SearchService>) -> Self {
        self.search_service = Some(service);
        self
    }

    pub fn build(self) -> AgentOptions {
        AgentOptions {
            provider: self.provider,
            debug: self.debug,
            vision: self.vision,
            max_iterations: self.max_iterations,
            max_consecutive_errors: self.max_consecutive_errors,
            max_total_errors: self.max_total_errors,
            max_validation_attempts: self.max_validation_attempts,
            max_repeated_actions: self.max_repeated_actions,
            initial_navigation_retries: self.initial_navigation_retries,
            guardrails: self.guardrails,
            search_provider: self.search_provider,
            search_api_key: self.search_api_key,
            search_service: self.search_service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_provider::MockLlmProvider;

    #[test]
    fn defaults_are_conservative_and_finite() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![]));
        let opts = AgentOptions::builder(provider).build();
        assert_eq!(opts.max_iterations, 50);
        assert_eq!(opts.max_consecutive_errors, 3);
        assert!(matches!(opts.search_provider, SearchProvider::None));
    }

    #[test]
    fn builder_overrides_apply() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![]));
        let opts = AgentOptions::builder(provider)
            .max_iterations(5)
            .guardrails("never submit a form")
            .build();
        assert_eq!(opts.max_iterations, 5);
        assert_eq!(opts.guardrails.as_deref(), Some("never submit a form"));
    }
}
