use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, documents, health, sessions};
use crate::state::AppState;

/// Main application router: ingestion, chat and history endpoints over the
/// shared state, with CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/rag/upload", post(documents::upload))
        .route("/api/rag/ingest/url", post(documents::ingest_url))
        .route("/api/rag/chat", post(chat::chat))
        .route("/api/rag/summarize", post(documents::summarize))
        .route("/api/rag/documents", get(documents::list_documents))
        .route(
            "/api/rag/document/:document_id",
            patch(documents::update_document).delete(documents::delete_document),
        )
        .route("/api/rag/history", get(sessions::list_sessions))
        .route(
            "/api/rag/history/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
