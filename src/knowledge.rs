//! Knowledge base search.
//!
//! Answers `POST /api/search`: embed the query, fetch the nearest documents
//! from the vector index, and format them into a context block the client
//! folds into its session instructions. Results are cached briefly since
//! voice conversations tend to repeat phrasings.

use std::time::Duration;

use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

/// Default embeddings endpoint.
const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Nearest neighbours fetched per query.
const TOP_K: usize = 3;

/// Cached contexts kept.
const CACHE_CAPACITY: u64 = 512;

/// Cache entry lifetime.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// One scored document from the index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Similarity score
    pub score: f32,
    /// Document text
    pub text: String,
    /// Optional source label
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Debug, Deserialize)]
struct MatchMetadata {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

/// Embedding-backed vector index search.
pub struct KnowledgeBase {
    client: reqwest::Client,
    embeddings_url: String,
    embedding_model: String,
    api_key: String,
    index_url: String,
    index_api_key: String,
    cache: Cache<String, Option<String>>,
}

impl KnowledgeBase {
    /// Knowledge base against the given vector index.
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
        index_url: impl Into<String>,
        index_api_key: impl Into<String>,
    ) -> Self {
        KnowledgeBase {
            client,
            embeddings_url: EMBEDDINGS_URL.to_string(),
            embedding_model: embedding_model.into(),
            api_key: api_key.into(),
            index_url: index_url.into(),
            index_api_key: index_api_key.into(),
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Override the embeddings endpoint (testing).
    pub fn with_embeddings_url(mut self, url: impl Into<String>) -> Self {
        self.embeddings_url = url.into();
        self
    }

    /// Search the index and return a formatted context block, or `None`
    /// when nothing relevant was found.
    pub async fn search(&self, query: &str) -> AppResult<Option<String>> {
        let key = query.trim().to_lowercase();
        if let Some(hit) = self.cache.get(&key).await {
            debug!("knowledge cache hit");
            return Ok(hit);
        }

        let vector = self.embed(query).await?;
        let hits = self.query_index(&vector).await?;
        info!(hits = hits.len(), "knowledge search complete");

        let context = format_context(&hits);
        self.cache.insert(key, context.clone()).await;
        Ok(context)
    }

    async fn embed(&self, query: &str) -> AppResult<Vec<f32>> {
        let response = self
            .client
            .post(&self.embeddings_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.embedding_model,
                "input": query,
            }))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("embeddings request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "embeddings returned {status}"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed embeddings response: {e}")))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Upstream("embeddings response had no vectors".to_string()))
    }

    async fn query_index(&self, vector: &[f32]) -> AppResult<Vec<SearchHit>> {
        let response = self
            .client
            .post(format!("{}/query", self.index_url.trim_end_matches('/')))
            .header("Api-Key", &self.index_api_key)
            .json(&json!({
                "vector": vector,
                "topK": TOP_K,
                "includeMetadata": true,
                "includeValues": false,
            }))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("index query failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!("index returned {status}")));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed index response: {e}")))?;

        Ok(body
            .matches
            .into_iter()
            .filter_map(|m| {
                let metadata = m.metadata?;
                Some(SearchHit {
                    score: m.score,
                    text: metadata.text?,
                    source: metadata.source,
                })
            })
            .collect())
    }
}

/// Format search hits into the context block handed to the model.
pub fn format_context(hits: &[SearchHit]) -> Option<String> {
    if hits.is_empty() {
        return None;
    }
    let mut context = String::from("Information found for the question:\n\n");
    for (i, hit) in hits.iter().enumerate() {
        context.push_str(&format!("[Item {}]\n{}\n", i + 1, hit.text));
        if let Some(source) = &hit.source {
            context.push_str(&format!("Source: {source}\n"));
        }
        context.push('\n');
    }
    Some(context)
}
