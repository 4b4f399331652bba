//! `CorpusStore` trait — abstract interface for document/chunk storage.
//!
//! The primary implementation is `SqliteCorpusStore` in the `sqlite`
//! module; tests substitute their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    Upload,
    Web,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Upload => "upload",
            SourceCategory::Web => "web",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "web" => SourceCategory::Web,
            _ => SourceCategory::Upload,
        }
    }
}

/// An ingested document. Owns its chunks: deleting the document cascades.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub category: SourceCategory,
    pub tags: Vec<String>,
    pub created_at: String,
}

/// A chunk as returned from storage. The numeric id doubles as insertion
/// order, which similarity ranking uses to break score ties.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub id: i64,
    pub document_id: String,
    pub text: String,
    pub start_offset: usize,
}

/// A chunk waiting to be inserted alongside its embedding.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    pub start_offset: usize,
    pub embedding: Vec<f32>,
}

/// One similarity-search result.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Durable document + chunk storage with vector search.
///
/// Invariant: embedding dimensionality is fixed per store instance; the
/// first insert pins it and later inserts with a different length are
/// rejected.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn create_document(
        &self,
        title: &str,
        category: SourceCategory,
        tags: &[String],
    ) -> Result<DocumentRecord, ApiError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, ApiError>;

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, ApiError>;

    async fn rename_document(&self, document_id: &str, title: &str) -> Result<bool, ApiError>;

    async fn set_document_tags(&self, document_id: &str, tags: &[String])
        -> Result<bool, ApiError>;

    /// Removes the document and all of its chunks in one transaction; a
    /// concurrent search sees either every chunk or none.
    async fn delete_document(&self, document_id: &str) -> Result<bool, ApiError>;

    /// Inserts one document's chunks transactionally.
    async fn insert_chunks(&self, document_id: &str, chunks: Vec<NewChunk>)
        -> Result<(), ApiError>;

    /// Chunk count, optionally scoped to one document.
    async fn chunk_count(&self, document_id: Option<&str>) -> Result<usize, ApiError>;

    /// Top-`k` chunks by cosine similarity, descending, ties broken by
    /// insertion order. `document_id = None` searches the whole corpus. An
    /// empty chunk set yields an empty result, never an error.
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<ChunkHit>, ApiError>;

    /// First `limit` chunk texts in insertion order, for summarization.
    async fn fetch_chunk_texts(
        &self,
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ApiError>;
}
