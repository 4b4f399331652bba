//! Completion/embedding providers behind one capability interface.
//!
//! Two interchangeable variants: `GeminiProvider` (cloud REST API) and
//! `OllamaProvider` (local model server). Pipeline code only ever sees
//! `dyn ModelProvider`.

pub mod gemini;
pub mod ollama;
mod provider;
mod types;

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderKind};

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use provider::ModelProvider;
pub use types::{ChatMessage, ImagePart};

pub fn build_provider(config: &ProviderConfig) -> Arc<dyn ModelProvider> {
    match config.kind {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(config)),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)),
    }
}
