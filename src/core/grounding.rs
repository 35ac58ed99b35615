//! Conversation grounding.
//!
//! After each finished user utterance the controller can fetch relevant
//! knowledge and fold it into the session instructions before the model
//! responds. Grounding is best-effort: a slow or failing retriever degrades
//! to the ungrounded prompt, never blocks the conversation.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::error::SessionError;

/// Default time allowed for a retrieval round trip.
const RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached answers kept per retriever.
const CACHE_CAPACITY: u64 = 256;

/// Cache entry lifetime.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Something that can fetch knowledge relevant to a user utterance.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Fetch context for `query`. `None` means nothing relevant was found,
    /// which is not an error.
    async fn retrieve(&self, query: &str) -> Result<Option<String>, SessionError>;
}

/// Build the grounded instruction set: base prompt plus retrieved context
/// under an explicit heading the model is told to prefer.
pub fn grounded_instructions(base: &str, context: &str) -> String {
    format!(
        "{base}\n\nRelevant information from the knowledge base:\n{context}\n\n\
         Prefer this information when it answers the user's question."
    )
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    // Both field names appear in the wild for this endpoint shape
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

/// Retriever backed by the backend's search endpoint, with an in-memory
/// answer cache keyed by normalized query.
pub struct HttpContextRetriever {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    cache: Cache<String, Option<String>>,
}

impl HttpContextRetriever {
    /// Retriever for `endpoint` (e.g. `http://localhost:3001/api/search`).
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        HttpContextRetriever {
            client,
            endpoint: endpoint.into(),
            timeout: RETRIEVAL_TIMEOUT,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Override the retrieval timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, query: &str) -> Result<Option<String>, SessionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::Timeout("context retrieval".to_string())
                } else {
                    SessionError::Retrieval(format!("search request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Retrieval(format!(
                "search returned {status}: {body}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Retrieval(format!("malformed search response: {e}")))?;

        Ok(body
            .context
            .or(body.answer)
            .filter(|s| !s.trim().is_empty()))
    }
}

#[async_trait]
impl ContextRetriever for HttpContextRetriever {
    async fn retrieve(&self, query: &str) -> Result<Option<String>, SessionError> {
        let key = query.trim().to_lowercase();
        if key.is_empty() {
            return Ok(None);
        }

        if let Some(hit) = self.cache.get(&key).await {
            debug!("context cache hit");
            return Ok(hit);
        }

        match self.fetch(query).await {
            Ok(result) => {
                self.cache.insert(key, result.clone()).await;
                Ok(result)
            }
            Err(e) => {
                // Failures are not cached; the next utterance retries
                warn!("context retrieval failed: {e}");
                Err(e)
            }
        }
    }
}
