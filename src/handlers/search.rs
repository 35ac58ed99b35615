//! Knowledge search endpoint.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    query: String,
}

/// `POST /api/search` - embed the query, search the vector index, and
/// return a formatted context block. `context` is `null` when nothing
/// relevant was found.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> AppResult<Json<Value>> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::BadRequest("query is required".to_string()));
    }

    let knowledge = state
        .knowledge
        .as_ref()
        .ok_or_else(|| AppError::NotConfigured("knowledge search is not configured".to_string()))?;

    info!(%query, "knowledge search");
    let context = knowledge.search(query).await?;
    Ok(Json(json!({ "context": context })))
}
