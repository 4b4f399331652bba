//! Ingestion pipeline: validate → create document → chunk → embed → index.
//!
//! Embedding failures abort the whole ingest. Chunks only reach the store
//! in one transactional batch, and on failure the freshly-created document
//! record is deleted again, so a half-indexed document is never left
//! behind.

use std::sync::Arc;

use serde::Serialize;

use crate::chunker::{ChunkSpan, Chunker};
use crate::config::ChunkingConfig;
use crate::errors::ApiError;
use crate::llm::ModelProvider;
use crate::rag::{CorpusStore, NewChunk, SourceCategory};

/// Embedding requests are batched to bound provider payload size.
const EMBED_BATCH: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub document_id: String,
    pub chunk_count: usize,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    corpus: Arc<dyn CorpusStore>,
    provider: Arc<dyn ModelProvider>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(
        corpus: Arc<dyn CorpusStore>,
        provider: Arc<dyn ModelProvider>,
        chunking: ChunkingConfig,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            corpus,
            provider,
            chunker: Chunker::new(chunking)?,
        })
    }

    pub async fn ingest(
        &self,
        text: &str,
        title: &str,
        category: SourceCategory,
        tags: &[String],
    ) -> Result<IngestReceipt, ApiError> {
        // Chunking validates the text before anything is written.
        let spans: Vec<ChunkSpan> = self.chunker.split(text)?.collect();

        let document = self.corpus.create_document(title, category, tags).await?;
        tracing::info!(
            "Ingesting '{}' ({}): {} chunks",
            title,
            document.id,
            spans.len()
        );

        match self.index_chunks(&document.id, &spans).await {
            Ok(chunk_count) => Ok(IngestReceipt {
                document_id: document.id,
                chunk_count,
            }),
            Err(err) => {
                // The document record already exists; take it back out so
                // the caller does not see a silently-empty document.
                if let Err(cleanup_err) = self.corpus.delete_document(&document.id).await {
                    tracing::warn!(
                        "Failed to clean up document {} after ingest error: {}",
                        document.id,
                        cleanup_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn index_chunks(
        &self,
        document_id: &str,
        spans: &[ChunkSpan],
    ) -> Result<usize, ApiError> {
        let mut chunks = Vec::with_capacity(spans.len());

        for batch in spans.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|span| span.text.clone()).collect();
            let embeddings = self.provider.embed(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(ApiError::Provider(format!(
                    "embedder returned {} vectors for {} inputs",
                    embeddings.len(),
                    batch.len()
                )));
            }

            for (span, embedding) in batch.iter().zip(embeddings) {
                chunks.push(NewChunk {
                    text: span.text.clone(),
                    start_offset: span.start_offset,
                    embedding,
                });
            }
        }

        let count = chunks.len();
        self.corpus.insert_chunks(document_id, chunks).await?;
        Ok(count)
    }
}
