//! Streaming answer generation.
//!
//! `AnswerStreamer` turns a `(question, context, history)` triple into an
//! ordered token stream plus a final concatenated answer. Tokens are
//! relayed into a bounded channel owned by the transport layer; when the
//! consumer drops its receiver the relay stops and the provider call is
//! aborted. A provider failure never propagates as an error: the stream
//! ends with a visible error marker token and whatever text was gathered
//! is returned as the final answer.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::ApiError;
use crate::llm::{ChatMessage, ImagePart, ModelProvider};

/// Lifecycle of one streamed answer:
/// `Idle → Requesting → Streaming → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

/// Everything one answer needs. `allow_general_knowledge` is a per-request
/// policy choice, not a global default.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    /// Assembled grounding context; empty means "no grounding available".
    pub context: String,
    /// Windowed conversation history, oldest first.
    pub history: Vec<ChatMessage>,
    pub image: Option<ImagePart>,
    pub allow_general_knowledge: bool,
}

/// Terminal result of a streamed answer.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    /// Concatenated answer; on failure, the partial text gathered so far
    /// (or the error marker when nothing arrived at all).
    pub text: String,
    /// `Completed` or `Failed`; cancellation lands in `Failed`.
    pub phase: StreamPhase,
    /// The consumer dropped its receiver mid-stream.
    pub cancelled: bool,
}

impl AnswerOutcome {
    pub fn completed(&self) -> bool {
        self.phase == StreamPhase::Completed
    }
}

#[derive(Clone)]
pub struct AnswerStreamer {
    provider: Arc<dyn ModelProvider>,
}

impl AnswerStreamer {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Builds the structured prompt: grounding rules as the system turn,
    /// replayed history, then the final user turn with CONTEXT/QUESTION
    /// interpolation.
    pub fn build_prompt(request: &AnswerRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(grounding_rules(
            !request.context.is_empty(),
            request.allow_general_knowledge,
        ))];

        for message in &request.history {
            if !message.content.trim().is_empty() {
                messages.push(message.clone());
            }
        }

        let final_turn = if request.context.is_empty() {
            format!("QUESTION:\n{}", request.question)
        } else {
            format!(
                "CONTEXT:\n{}\n\nQUESTION:\n{}",
                request.context, request.question
            )
        };
        messages.push(ChatMessage::user(final_turn));

        messages
    }

    /// Drives the provider and relays tokens into `sink` in arrival order.
    /// Never returns an error: the outcome always carries a usable answer
    /// text, and failures surface as a marker token on the stream.
    pub async fn stream(
        &self,
        request: AnswerRequest,
        sink: mpsc::Sender<String>,
    ) -> AnswerOutcome {
        let messages = Self::build_prompt(&request);
        let image = request.image.clone();

        // Requesting: the provider has not accepted the call yet.
        let mut tokens = match self.provider.stream_chat(messages, image).await {
            Ok(receiver) => receiver,
            Err(err) => {
                tracing::warn!("Provider rejected stream request: {}", err);
                let marker = error_marker(&err);
                let _ = sink.send(marker.clone()).await;
                return AnswerOutcome {
                    text: marker,
                    phase: StreamPhase::Failed,
                    cancelled: false,
                };
            }
        };

        // Streaming: tokens flow until end-of-stream or a transport error.
        let mut answer = String::new();

        while let Some(item) = tokens.recv().await {
            match item {
                Ok(token) => {
                    answer.push_str(&token);
                    if sink.send(token).await.is_err() {
                        // Consumer went away. Dropping the receiver aborts
                        // the provider call; the partial answer is handed
                        // back but flagged so it is never persisted.
                        tracing::debug!("Token sink closed, cancelling stream");
                        return AnswerOutcome {
                            text: answer,
                            phase: StreamPhase::Failed,
                            cancelled: true,
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!("Stream failed mid-answer: {}", err);
                    let marker = error_marker(&err);
                    let _ = sink.send(marker.clone()).await;
                    let text = if answer.is_empty() { marker } else { answer };
                    return AnswerOutcome {
                        text,
                        phase: StreamPhase::Failed,
                        cancelled: false,
                    };
                }
            }
        }

        AnswerOutcome {
            text: answer,
            phase: StreamPhase::Completed,
            cancelled: false,
        }
    }
}

fn grounding_rules(has_context: bool, allow_general_knowledge: bool) -> String {
    let mut rules = String::from("You are a retrieval-augmented assistant.\nRULES:\n");

    if has_context {
        rules.push_str("1. Use ONLY the information in CONTEXT to answer the question.\n");
        if allow_general_knowledge {
            rules.push_str(
                "2. If the context is not sufficient, you may draw on general \
                 knowledge, and say when you do.\n",
            );
        } else {
            rules.push_str(
                "2. If the answer is not in the context, say \"I don't know based \
                 on the provided documents.\" Do NOT invent facts.\n",
            );
        }
        rules.push_str("3. Be concise and helpful.\n");
    } else if allow_general_knowledge {
        rules.push_str(
            "1. No document context is available; answer from general knowledge.\n\
             2. Be concise and helpful.\n",
        );
    } else {
        rules.push_str(
            "1. No document context is available for this question.\n\
             2. State that the answer cannot be determined from the provided \
             documents. Do NOT invent facts.\n",
        );
    }

    rules
}

fn error_marker(err: &ApiError) -> String {
    let short = match err {
        ApiError::Provider(_) => "the model provider failed",
        ApiError::Persistence(_) => "storage is unavailable",
        _ => "an internal error occurred",
    };
    format!("\n[answer interrupted: {short}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider: yields `tokens`, optionally failing after a
    /// prefix or refusing the request outright. Captures every prompt.
    struct ScriptedProvider {
        tokens: Vec<String>,
        fail_after: Option<usize>,
        refuse_request: bool,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn streaming(tokens: &[&str]) -> Self {
            Self {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                fail_after: None,
                refuse_request: false,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing_after(tokens: &[&str], n: usize) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::streaming(tokens)
            }
        }

        fn refusing() -> Self {
            Self {
                refuse_request: true,
                ..Self::streaming(&[])
            }
        }

        fn last_prompt(&self) -> Vec<ChatMessage> {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn stream_chat(
            &self,
            messages: Vec<ChatMessage>,
            _image: Option<ImagePart>,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            self.prompts.lock().unwrap().push(messages);

            if self.refuse_request {
                return Err(ApiError::Provider("connection refused".to_string()));
            }

            let (tx, rx) = mpsc::channel(32);
            let tokens = self.tokens.clone();
            let count = tokens.len();
            let fail_after = self.fail_after;

            tokio::spawn(async move {
                for (i, token) in tokens.into_iter().enumerate() {
                    if fail_after == Some(i) {
                        let _ = tx
                            .send(Err(ApiError::Provider("reset by peer".to_string())))
                            .await;
                        return;
                    }
                    if tx.send(Ok(token)).await.is_err() {
                        return;
                    }
                }
                if fail_after.is_some_and(|n| n >= count) {
                    let _ = tx
                        .send(Err(ApiError::Provider("reset by peer".to_string())))
                        .await;
                }
            });

            Ok(rx)
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ApiError> {
            Ok("summary".to_string())
        }
    }

    fn request(context: &str, allow_general_knowledge: bool) -> AnswerRequest {
        AnswerRequest {
            question: "What is gravity?".to_string(),
            context: context.to_string(),
            history: Vec::new(),
            image: None,
            allow_general_knowledge,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(token) = rx.recv().await {
            out.push(token);
        }
        out
    }

    #[tokio::test]
    async fn tokens_arrive_in_order_and_concatenate() {
        let provider = Arc::new(ScriptedProvider::streaming(&["A ", "force ", "of nature."]));
        let streamer = AnswerStreamer::new(provider);

        let (tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(drain(rx));

        let outcome = streamer.stream(request("Gravity pulls.", false), tx).await;
        let tokens = collector.await.unwrap();

        assert_eq!(tokens, vec!["A ", "force ", "of nature."]);
        assert_eq!(outcome.text, "A force of nature.");
        assert!(outcome.completed());
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn midstream_failure_emits_marker_and_keeps_partial() {
        let provider = Arc::new(ScriptedProvider::failing_after(&["Partial ", "answer"], 1));
        let streamer = AnswerStreamer::new(provider);

        let (tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(drain(rx));

        let outcome = streamer.stream(request("ctx", false), tx).await;
        let tokens = collector.await.unwrap();

        assert_eq!(outcome.phase, StreamPhase::Failed);
        assert_eq!(outcome.text, "Partial ");
        assert!(tokens.last().unwrap().contains("answer interrupted"));
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn refused_request_still_yields_a_terminal_token() {
        let provider = Arc::new(ScriptedProvider::refusing());
        let streamer = AnswerStreamer::new(provider);

        let (tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(drain(rx));

        let outcome = streamer.stream(request("", false), tx).await;
        let tokens = collector.await.unwrap();

        assert_eq!(outcome.phase, StreamPhase::Failed);
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].contains("answer interrupted"));
        assert_eq!(outcome.text, tokens[0]);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_the_stream() {
        let provider = Arc::new(ScriptedProvider::streaming(&["one", "two", "three"]));
        let streamer = AnswerStreamer::new(provider);

        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let outcome = streamer.stream(request("ctx", false), tx).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.phase, StreamPhase::Failed);
    }

    #[tokio::test]
    async fn prompt_interpolates_context_history_and_question() {
        let provider = Arc::new(ScriptedProvider::streaming(&["ok"]));
        let streamer = AnswerStreamer::new(provider.clone());

        let mut req = request("Gravity is a force.", false);
        req.history = vec![
            ChatMessage::user("Earlier question"),
            ChatMessage::model("Earlier answer"),
        ];

        let (tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(drain(rx));
        streamer.stream(req, tx).await;
        collector.await.unwrap();

        let prompt = provider.last_prompt();
        assert_eq!(prompt[0].role, "system");
        assert!(prompt[0].content.contains("ONLY the information in CONTEXT"));
        assert_eq!(prompt[1].content, "Earlier question");
        assert_eq!(prompt[2].content, "Earlier answer");
        let last = prompt.last().unwrap();
        assert!(last.content.starts_with("CONTEXT:\nGravity is a force."));
        assert!(last.content.contains("QUESTION:\nWhat is gravity?"));
    }

    #[tokio::test]
    async fn empty_context_without_fallback_demands_an_apology() {
        let provider = Arc::new(ScriptedProvider::streaming(&["ok"]));
        let streamer = AnswerStreamer::new(provider.clone());

        let (tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(drain(rx));
        streamer.stream(request("", false), tx).await;
        collector.await.unwrap();

        let prompt = provider.last_prompt();
        assert!(prompt[0]
            .content
            .contains("cannot be determined from the provided documents"));
        assert!(!prompt.last().unwrap().content.contains("CONTEXT:"));
    }

    #[tokio::test]
    async fn general_knowledge_flag_switches_the_policy() {
        let provider = Arc::new(ScriptedProvider::streaming(&["ok"]));
        let streamer = AnswerStreamer::new(provider.clone());

        let (tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(drain(rx));
        streamer.stream(request("some context", true), tx).await;
        collector.await.unwrap();

        let prompt = provider.last_prompt();
        assert!(prompt[0].content.contains("general"));
        assert!(!prompt[0].content.contains("I don't know based"));
    }
}
