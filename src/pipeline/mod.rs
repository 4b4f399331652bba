//! Orchestration: ingestion (document → chunks → embeddings → index) and
//! query (question → retrieval → streamed answer → history).

mod ingest;
mod query;

pub use ingest::{IngestReceipt, IngestionPipeline};
pub use query::{ChatStream, QueryOptions, QueryPipeline};
