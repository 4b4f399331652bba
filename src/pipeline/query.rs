//! Query pipeline: retrieve grounding, stream the answer, persist the
//! exchange.
//!
//! The caller consumes tokens from `ChatStream::tokens` while the pipeline
//! task runs; once the stream completes (and was not cancelled) both the
//! user message and the model answer are appended to the session in a
//! single call, so a reader never sees a question without its answer
//! outside the brief in-flight window.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::errors::ApiError;
use crate::history::{HistoryStore, NewMessage};
use crate::llm::{ChatMessage, ImagePart, ModelProvider};
use crate::rag::{ContextAssembler, CorpusStore};
use crate::streamer::{AnswerOutcome, AnswerRequest, AnswerStreamer};

const IMAGE_PLACEHOLDER_QUESTION: &str = "Describe this image";
const TOKEN_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub question: Option<String>,
    /// Restrict retrieval to one document; `None` skips retrieval entirely
    /// (free chat).
    pub document_id: Option<String>,
    /// Existing session to continue; a fresh one is created lazily when
    /// absent.
    pub session_id: Option<String>,
    /// Replay the conversational window into the prompt.
    pub include_history: bool,
    /// Allow the provider to fall back to general knowledge when the
    /// context is insufficient. Per-request policy.
    pub allow_general_knowledge: bool,
    pub image: Option<ImagePart>,
}

/// A running answer: the transport drains `tokens`, then awaits `outcome`
/// for the final text.
#[derive(Debug)]
pub struct ChatStream {
    pub session_id: String,
    pub tokens: mpsc::Receiver<String>,
    pub outcome: oneshot::Receiver<AnswerOutcome>,
}

#[derive(Clone)]
pub struct QueryPipeline {
    corpus: Arc<dyn CorpusStore>,
    history: HistoryStore,
    provider: Arc<dyn ModelProvider>,
    streamer: AnswerStreamer,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        corpus: Arc<dyn CorpusStore>,
        history: HistoryStore,
        provider: Arc<dyn ModelProvider>,
        retrieval: RetrievalConfig,
    ) -> Self {
        let streamer = AnswerStreamer::new(provider.clone());
        Self {
            corpus,
            history,
            provider,
            streamer,
            retrieval,
        }
    }

    /// Starts a streamed chat turn. Fails fast on unusable input; provider
    /// trouble after this point surfaces on the stream, not as an `Err`.
    pub async fn chat(&self, options: QueryOptions) -> Result<ChatStream, ApiError> {
        let question = options
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        if question.is_none() && options.image.is_none() {
            return Err(ApiError::EmptyInput(
                "enter a question or attach an image".to_string(),
            ));
        }

        let context = self
            .retrieve_context(question.as_deref(), options.document_id.as_deref())
            .await?;

        let session_id = options
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = if options.include_history {
            self.history
                .window(&session_id, self.retrieval.history_window)
                .await?
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content,
                })
                .collect()
        } else {
            Vec::new()
        };

        let question_text =
            question.unwrap_or_else(|| IMAGE_PLACEHOLDER_QUESTION.to_string());
        let request = AnswerRequest {
            question: question_text.clone(),
            context,
            history,
            image: options.image.clone(),
            allow_general_knowledge: options.allow_general_knowledge,
        };

        let (token_tx, token_rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let streamer = self.streamer.clone();
        let history_store = self.history.clone();
        let persist_session = session_id.clone();
        let image_attachment = options
            .image
            .as_ref()
            .map(|img| json!({ "kind": "image", "mime_type": img.mime_type }));

        tokio::spawn(async move {
            let outcome = streamer.stream(request, token_tx).await;

            if outcome.cancelled {
                // Hard disconnect: the partial answer is discarded, never
                // saved as if it were complete.
                tracing::debug!(
                    "Client disconnected mid-stream; discarding partial answer for {}",
                    persist_session
                );
            } else {
                let mut user_message = NewMessage::user(question_text);
                if let Some(attachment) = image_attachment {
                    user_message = user_message.with_attachment(attachment);
                }
                let exchange = [user_message, NewMessage::model(outcome.text.clone())];

                if let Err(err) = history_store.append(&persist_session, &exchange).await {
                    tracing::warn!("Failed to persist exchange for {}: {}", persist_session, err);
                }
            }

            let _ = outcome_tx.send(outcome);
        });

        Ok(ChatStream {
            session_id,
            tokens: token_rx,
            outcome: outcome_rx,
        })
    }

    /// Grounding context for a question, or empty when there is nothing to
    /// ground on. An unknown or empty document scope yields empty context
    /// rather than an error; the prompt rules handle the rest.
    async fn retrieve_context(
        &self,
        question: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let Some(document_id) = document_id else {
            return Ok(String::new());
        };
        let Some(question) = question else {
            return Ok(String::new());
        };

        if self.corpus.chunk_count(Some(document_id)).await? == 0 {
            return Ok(String::new());
        }

        let embeddings = self.provider.embed(&[question.to_string()]).await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Provider("embedder returned no vector".to_string()))?;

        let hits = self
            .corpus
            .search(&query_embedding, self.retrieval.top_k, Some(document_id))
            .await?;

        let assembler = ContextAssembler::new(self.retrieval.context_budget);
        Ok(assembler.assemble(&hits))
    }

    /// Concatenates the first chunks of the scope (bounded) and asks the
    /// provider for a bullet summary.
    pub async fn summarize(&self, document_id: Option<&str>) -> Result<String, ApiError> {
        let texts = self
            .corpus
            .fetch_chunk_texts(document_id, self.retrieval.summary_max_chunks)
            .await?;

        if texts.is_empty() {
            return Err(ApiError::EmptyInput(
                "no indexed content to summarize".to_string(),
            ));
        }

        let prompt = format!(
            "Summarize the following document into 8-12 concise bullet points.\n\
             Focus on key ideas, important definitions, and core concepts.\n\n\
             DOCUMENT:\n{}",
            texts.join("\n")
        );

        self.provider.complete(&prompt).await
    }
}
