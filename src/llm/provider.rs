use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatMessage, ImagePart};
use crate::errors::ApiError;

/// Capability interface over a completion/embedding backend.
///
/// Streaming contract: the receiver yields tokens in provider order and
/// closes on end-of-stream; a transport failure mid-stream arrives as one
/// final `Err` item. Dropping the receiver cancels the provider call.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logs (e.g. "gemini", "ollama").
    fn name(&self) -> &str;

    /// Embed each input into a fixed-length vector, one per input.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// Streaming chat completion.
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        image: Option<ImagePart>,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;

    /// One-shot completion, used for summarization.
    async fn complete(&self, prompt: &str) -> Result<String, ApiError>;
}
