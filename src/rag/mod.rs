//! Retrieval side of the pipeline: corpus storage, similarity search and
//! context assembly.

mod context;
pub mod sqlite;
mod store;

pub use context::ContextAssembler;
pub use sqlite::SqliteCorpusStore;
pub use store::{ChunkHit, CorpusStore, DocumentRecord, NewChunk, SourceCategory, StoredChunk};
