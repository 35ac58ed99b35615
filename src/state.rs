//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::knowledge::KnowledgeBase;
use crate::registry::SessionRegistry;

/// Default vendor endpoint for minting ephemeral realtime credentials.
pub const REALTIME_SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// State shared across request handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Shared HTTP client for upstream calls
    pub http: reqwest::Client,
    /// Registry of minted sessions
    pub sessions: SessionRegistry,
    /// Knowledge search, when a vector index is configured
    pub knowledge: Option<Arc<KnowledgeBase>>,
    /// Vendor mint endpoint; overridable for tests
    pub mint_url: String,
}

impl AppState {
    /// Build state from configuration. Knowledge search is wired only when
    /// the vector index is configured alongside the vendor API key.
    pub fn new(config: ServerConfig) -> Self {
        let http = reqwest::Client::new();
        let knowledge = match (
            &config.openai_api_key,
            &config.vector_index_url,
            &config.vector_index_api_key,
        ) {
            (Some(api_key), Some(index_url), Some(index_key)) => Some(Arc::new(
                KnowledgeBase::new(
                    http.clone(),
                    api_key.clone(),
                    config.embedding_model.clone(),
                    index_url.clone(),
                    index_key.clone(),
                ),
            )),
            _ => None,
        };

        AppState {
            config: Arc::new(config),
            http,
            sessions: SessionRegistry::new(),
            knowledge,
            mint_url: REALTIME_SESSIONS_URL.to_string(),
        }
    }

    /// Point credential minting at a non-default endpoint (testing).
    pub fn with_mint_url(mut self, url: impl Into<String>) -> Self {
        self.mint_url = url.into();
        self
    }
}
