use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, search, session};
use crate::state::AppState;

/// Create the API router.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/session", get(session::mint_session))
        .route("/api/sessions", get(session::list_sessions))
        .route("/api/session/{id}", delete(session::forget_session))
        .route("/api/search", post(search::search))
        .layer(TraceLayer::new_for_http())
}
