//! Streaming chat endpoint.
//!
//! Tokens are relayed from the pipeline's channel straight into a chunked
//! plain-text response body. When the client disconnects, axum drops the
//! body stream, the channel receiver goes with it, and the pipeline
//! observes the closed channel and aborts the provider call.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::errors::ApiError;
use crate::llm::ImagePart;
use crate::pipeline::QueryOptions;
use crate::state::AppState;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub question: Option<String>,
    #[serde(rename = "documentId")]
    pub document_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    /// Lets the provider fall back to general knowledge when the context
    /// does not cover the question.
    #[serde(rename = "useWebSearch", default)]
    pub use_web_search: bool,
    #[serde(rename = "includeHistory", default = "default_true")]
    pub include_history: bool,
    /// `data:image/...;base64,...` URL.
    #[serde(rename = "imageData")]
    pub image_data: Option<String>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<impl IntoResponse, ApiError> {
    let image = match body.image_data.as_deref() {
        Some(url) => Some(
            ImagePart::from_data_url(url)
                .ok_or_else(|| ApiError::BadRequest("malformed image data URL".to_string()))?,
        ),
        None => None,
    };

    let stream = state
        .query
        .chat(QueryOptions {
            question: body.question,
            document_id: body.document_id,
            session_id: body.session_id,
            include_history: body.include_history,
            allow_general_knowledge: body.use_web_search,
            image,
        })
        .await?;

    let session_id = stream.session_id.clone();
    let token_body = futures_util::stream::unfold(stream.tokens, |mut tokens| async move {
        tokens
            .recv()
            .await
            .map(|token| (Ok::<Bytes, Infallible>(Bytes::from(token)), tokens))
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("X-Session-Id", session_id)
        .body(Body::from_stream(token_body))
        .map_err(ApiError::internal)?;

    Ok(response)
}
