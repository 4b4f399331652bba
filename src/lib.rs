//! Document-grounded chat backend: ingest documents into a vector index,
//! answer questions about them with a streaming model provider, and keep
//! per-session conversation history.

pub mod chunker;
pub mod config;
pub mod errors;
pub mod extract;
pub mod history;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod state;
pub mod streamer;
pub mod vector_math;
