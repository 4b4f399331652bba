//! Local provider variant: an Ollama server on localhost.
//!
//! Chat streaming is NDJSON over `/api/chat`; embeddings come from
//! `/api/embeddings` one prompt at a time.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::ModelProvider;
use super::types::{ChatMessage, ImagePart};
use crate::config::ProviderConfig;
use crate::errors::ApiError;

#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    chat_model: String,
    embed_model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model_or_default().to_string(),
            embed_model: config.embed_model_or_default().to_string(),
            client,
        }
    }

    /// Ollama's chat roles are `system`/`user`/`assistant`; an image rides
    /// on the final user message as raw base64.
    fn build_messages(messages: &[ChatMessage], image: Option<&ImagePart>) -> Vec<Value> {
        let mut wire: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role.as_str() {
                    "model" => "assistant",
                    "system" => "system",
                    _ => "user",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        if let Some(image) = image {
            if let Some(last) = wire.iter_mut().rev().find(|m| m["role"] == "user") {
                last["images"] = json!([image.data]);
            }
        }

        wire
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let mut embeddings = Vec::with_capacity(inputs.len());

        for input in inputs {
            let res = self
                .client
                .post(&url)
                .json(&json!({ "model": self.embed_model, "prompt": input }))
                .send()
                .await
                .map_err(ApiError::provider)?;

            if !res.status().is_success() {
                let status = res.status();
                let text = res.text().await.unwrap_or_default();
                return Err(ApiError::Provider(format!(
                    "Ollama embed failed ({status}): {text}"
                )));
            }

            let payload: Value = res.json().await.map_err(ApiError::provider)?;
            let vector: Vec<f32> = payload["embedding"]
                .as_array()
                .ok_or_else(|| ApiError::Provider("Ollama embed: missing embedding".to_string()))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();

            embeddings.push(vector);
        }

        Ok(embeddings)
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        image: Option<ImagePart>,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": self.chat_model,
            "messages": Self::build_messages(&messages, image.as_ref()),
            "stream": true,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!(
                "Ollama stream failed ({status}): {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::provider(e))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // One JSON object per line; hold back the partial tail.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    if line.is_empty() {
                        continue;
                    }
                    let Ok(payload) = serde_json::from_str::<Value>(&line) else {
                        continue;
                    };

                    if let Some(content) = payload["message"]["content"].as_str() {
                        if !content.is_empty()
                            && tx.send(Ok(content.to_string())).await.is_err()
                        {
                            // Consumer cancelled; drop the stream.
                            return;
                        }
                    }
                    if payload["done"].as_bool() == Some(true) {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn complete(&self, prompt: &str) -> Result<String, ApiError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.chat_model,
            "prompt": prompt,
            "stream": false,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!(
                "Ollama completion failed ({status}): {text}"
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;
        Ok(payload["response"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_ollama_vocabulary() {
        let messages = vec![
            ChatMessage::system("rules"),
            ChatMessage::user("q"),
            ChatMessage::model("a"),
        ];
        let wire = OllamaProvider::build_messages(&messages, None);

        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[2]["role"], "assistant");
    }

    #[test]
    fn image_lands_on_last_user_message() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::model("answer"),
            ChatMessage::user("look at this"),
        ];
        let image = ImagePart {
            mime_type: "image/jpeg".to_string(),
            data: "BBBB".to_string(),
        };

        let wire = OllamaProvider::build_messages(&messages, Some(&image));
        assert!(wire[0].get("images").is_none());
        assert_eq!(wire[2]["images"][0], "BBBB");
    }
}
