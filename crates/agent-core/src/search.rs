//! Minimal `SearchService` contract (§6). A concrete provider (e.g. an HTTP
//! search API) is an external collaborator and out of scope here; the
//! Orchestrator consumes whatever implementation the caller supplies via
//! `AgentOptionsBuilder::search_service`, wiring it into the `web_search`
//! tool and eagerly validating it's present before the loop starts
//! (§4.I step 4).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SearchError {
    #[error("search provider requires an api key")]
    MissingApiKey,
    #[error("search request failed: {0}")]
    RequestFailed(String),
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, SearchError>;
}
