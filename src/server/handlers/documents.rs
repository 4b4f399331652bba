use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiError;
use crate::extract::url_host;
use crate::rag::{CorpusStore, SourceCategory};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestUrlBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeBody {
    #[serde(rename = "documentId")]
    pub document_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDocumentBody {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Multipart PDF (or plain-text) upload.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed upload: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
            file = Some((filename, bytes.to_vec()));
            break;
        }
    }

    let Some((filename, bytes)) = file else {
        return Err(ApiError::BadRequest("no file field in upload".to_string()));
    };

    let text = if filename.to_lowercase().ends_with(".pdf") {
        state.extractor.extract(&bytes)?
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    let receipt = state
        .ingestion
        .ingest(&text, &filename, SourceCategory::Upload, &[])
        .await?;

    Ok(Json(json!({
        "message": format!("Indexed {} chunks", receipt.chunk_count),
        "documentId": receipt.document_id,
        "chunkCount": receipt.chunk_count,
    })))
}

/// Scrapes a web page and ingests its text.
pub async fn ingest_url(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestUrlBody>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state.scraper.fetch(&body.url).await?;
    let title = format!("Web: {}", url_host(&body.url));

    let receipt = state
        .ingestion
        .ingest(&text, &title, SourceCategory::Web, &["web".to_string()])
        .await?;

    Ok(Json(json!({
        "message": format!("Indexed {} chunks", receipt.chunk_count),
        "documentId": receipt.document_id,
        "chunkCount": receipt.chunk_count,
    })))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let documents = state.corpus.list_documents().await?;
    Ok(Json(json!({ "documents": documents })))
}

/// Rename and/or retag a document.
pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(body): Json<UpdateDocumentBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.title.is_none() && body.tags.is_none() {
        return Err(ApiError::BadRequest(
            "nothing to update: provide title and/or tags".to_string(),
        ));
    }

    if let Some(title) = &body.title {
        if !state.corpus.rename_document(&document_id, title).await? {
            return Err(ApiError::NotFound(format!("document {document_id}")));
        }
    }
    if let Some(tags) = &body.tags {
        if !state.corpus.set_document_tags(&document_id, tags).await? {
            return Err(ApiError::NotFound(format!("document {document_id}")));
        }
    }

    let document = state
        .corpus
        .get_document(&document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {document_id}")))?;

    Ok(Json(json!({ "document": document })))
}

/// Deletes the document and, through the store, every chunk it owns.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.corpus.delete_document(&document_id).await? {
        return Err(ApiError::NotFound(format!("document {document_id}")));
    }
    Ok(Json(json!({ "message": "Removed" })))
}

pub async fn summarize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SummarizeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.query.summarize(body.document_id.as_deref()).await?;
    Ok(Json(json!({ "summary": summary })))
}
