//! Ephemeral credential minting.
//!
//! `GET /api/session` asks the vendor for a short-lived realtime session and
//! passes the vendor's JSON straight through to the client, which picks the
//! bearer out of `client_secret.value`. The long-lived vendor key never
//! leaves this process.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::registry::MintedSession;
use crate::state::AppState;

/// `GET /api/session` - mint an ephemeral credential.
pub async fn mint_session(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let api_key = state
        .config
        .openai_api_key
        .as_deref()
        .ok_or_else(|| AppError::NotConfigured("OPENAI_API_KEY is not set".to_string()))?;

    let response = state
        .http
        .post(&state.mint_url)
        .bearer_auth(api_key)
        .json(&json!({
            "model": state.config.realtime_model,
            "voice": state.config.realtime_voice,
        }))
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("mint request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!("mint returned {status}: {body}")));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("malformed mint response: {e}")))?;

    if let Some(session_id) = body.get("id").and_then(Value::as_str) {
        let ttl = body
            .pointer("/client_secret/expires_at")
            .and_then(Value::as_u64)
            .and_then(|expires_at| {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                expires_at.checked_sub(now)
            })
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(state.config.session_ttl_seconds));

        state.sessions.insert(MintedSession {
            session_id: session_id.to_string(),
            model: state.config.realtime_model.clone(),
            minted_at: Instant::now(),
            ttl,
        });
        info!(%session_id, ttl_secs = ttl.as_secs(), "session minted");
    }

    Ok(Json(body))
}

/// `GET /api/sessions` - count of outstanding minted sessions.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "live": state.sessions.live_count() }))
}

/// `DELETE /api/session/{id}` - forget a minted session.
pub async fn forget_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    match state.sessions.remove(&id) {
        Some(_) => Ok(Json(json!({ "removed": true }))),
        None => Err(AppError::BadRequest(format!("unknown session '{id}'"))),
    }
}
