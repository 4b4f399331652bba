//! Application paths and typed configuration.
//!
//! Configuration is layered: compiled defaults, then an optional
//! `config.toml` in the data directory, then environment overrides for the
//! values that differ per deployment (provider selection, API key, bind
//! port).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ApiError;

/// Filesystem layout for one backend instance.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub corpus_db_path: PathBuf,
    pub history_db_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        Self::at(&data_dir)
    }

    pub fn at(data_dir: &Path) -> Self {
        let log_dir = data_dir.join("logs");
        for dir in [data_dir, log_dir.as_path()] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir: data_dir.to_path_buf(),
            log_dir,
            corpus_db_path: data_dir.join("corpus.db"),
            history_db_path: data_dir.join("history.db"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("CORPORA_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("data");
    }

    if cfg!(target_os = "windows") {
        let base = env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string()));
        return PathBuf::from(base).join("Corpora");
    }

    if cfg!(target_os = "macos") {
        return home_dir()
            .join("Library")
            .join("Application Support")
            .join("Corpora");
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        home_dir()
            .join(".local/share")
            .to_string_lossy()
            .to_string()
    });
    PathBuf::from(xdg).join("corpora")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Which completion/embedding backend serves this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5050 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared between adjacent windows. Must stay below
    /// `chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks retained per query.
    pub top_k: usize,
    /// Character budget for the assembled context.
    pub context_budget: usize,
    /// Messages of history replayed into the prompt.
    pub history_window: usize,
    /// Upper bound on chunks fed to summarization.
    pub summary_max_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            context_budget: 4000,
            history_window: 6,
            summary_max_chunks: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub ollama_base_url: String,
    pub chat_model: String,
    pub embed_model: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            gemini_api_key: String::new(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            chat_model: String::new(),
            embed_model: String::new(),
            request_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Model names differ per backend; empty config fields fall back to the
    /// backend's defaults.
    pub fn chat_model_or_default(&self) -> &str {
        if !self.chat_model.is_empty() {
            return &self.chat_model;
        }
        match self.kind {
            ProviderKind::Gemini => "gemini-2.5-pro",
            ProviderKind::Ollama => "llama3",
        }
    }

    pub fn embed_model_or_default(&self) -> &str {
        if !self.embed_model.is_empty() {
            return &self.embed_model;
        }
        match self.kind {
            ProviderKind::Gemini => "text-embedding-004",
            ProviderKind::Ollama => "nomic-embed-text",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub provider: ProviderConfig,
}

impl AppConfig {
    pub fn load(paths: &AppPaths) -> Result<Self, ApiError> {
        let mut config = match fs::read_to_string(paths.data_dir.join("config.toml")) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| ApiError::InvalidConfig(format!("config.toml: {e}")))?,
            Err(_) => AppConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(kind) = env::var("CORPORA_PROVIDER") {
            match kind.to_lowercase().as_str() {
                "gemini" => self.provider.kind = ProviderKind::Gemini,
                "ollama" => self.provider.kind = ProviderKind::Ollama,
                other => tracing::warn!("Unknown CORPORA_PROVIDER '{}', keeping config", other),
            }
        }
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            self.provider.gemini_api_key = key;
        }
        if let Ok(url) = env::var("OLLAMA_BASE_URL") {
            self.provider.ollama_base_url = url;
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.chunking.chunk_size == 0 {
            return Err(ApiError::InvalidConfig(
                "chunking.chunk_size must be positive".to_string(),
            ));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(ApiError::InvalidConfig(format!(
                "chunking.overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.provider.kind == ProviderKind::Gemini && self.provider.gemini_api_key.is_empty() {
            return Err(ApiError::InvalidConfig(
                "GEMINI_API_KEY is required when provider.kind = gemini".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.provider.chat_model_or_default(), "llama3");
        assert_eq!(config.provider.embed_model_or_default(), "nomic-embed-text");
    }

    #[test]
    fn overlap_not_below_chunk_size_is_rejected() {
        let mut config = AppConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.overlap = 100;
        assert!(matches!(config.validate(), Err(ApiError::InvalidConfig(_))));
    }

    #[test]
    fn gemini_requires_api_key() {
        let mut config = AppConfig::default();
        config.provider.kind = ProviderKind::Gemini;
        assert!(config.validate().is_err());

        config.provider.gemini_api_key = "k".to_string();
        assert!(config.validate().is_ok());
    }
}
