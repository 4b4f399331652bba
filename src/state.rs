//! Process-wide wiring.
//!
//! Stores, provider and pipelines are constructed here and passed down
//! explicitly; nothing reaches for a hidden global. The entry point owns
//! the lifecycle: `initialize()` on startup, `close()` on shutdown.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{AppConfig, AppPaths};
use crate::extract::{PdfExtractor, TextExtractor, WebScraper};
use crate::history::HistoryStore;
use crate::llm::{build_provider, ModelProvider};
use crate::pipeline::{IngestionPipeline, QueryPipeline};
use crate::rag::SqliteCorpusStore;

const SCRAPE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize corpus store: {0}")]
    Corpus(#[source] anyhow::Error),

    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to build ingestion pipeline: {0}")]
    Ingestion(#[source] anyhow::Error),
}

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: AppConfig,
    pub corpus: Arc<SqliteCorpusStore>,
    pub history: HistoryStore,
    pub provider: Arc<dyn ModelProvider>,
    pub ingestion: IngestionPipeline,
    pub query: QueryPipeline,
    pub scraper: WebScraper,
    pub extractor: Arc<dyn TextExtractor>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        Self::initialize_at(AppPaths::new()).await
    }

    pub async fn initialize_at(paths: AppPaths) -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(paths);
        let config = AppConfig::load(&paths).map_err(|e| InitializationError::Config(e.into()))?;

        let corpus = Arc::new(
            SqliteCorpusStore::new(&paths)
                .await
                .map_err(|e| InitializationError::Corpus(e.into()))?,
        );

        let history = HistoryStore::new(paths.history_db_path.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let provider = build_provider(&config.provider);
        tracing::info!("Using '{}' provider", provider.name());

        let ingestion = IngestionPipeline::new(
            corpus.clone(),
            provider.clone(),
            config.chunking.clone(),
        )
        .map_err(|e| InitializationError::Ingestion(e.into()))?;

        let query = QueryPipeline::new(
            corpus.clone(),
            history.clone(),
            provider.clone(),
            config.retrieval.clone(),
        );

        Ok(Arc::new(AppState {
            paths,
            config,
            corpus,
            history,
            provider,
            ingestion,
            query,
            scraper: WebScraper::new(SCRAPE_TIMEOUT_SECS),
            extractor: Arc::new(PdfExtractor),
        }))
    }

    pub async fn close(&self) {
        self.corpus.close().await;
        self.history.close().await;
    }
}
