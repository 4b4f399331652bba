//! Cloud provider variant: Google Generative Language REST API.
//!
//! Chat streaming uses `streamGenerateContent?alt=sse` (SSE `data:` lines,
//! one JSON candidate delta each); embeddings use `batchEmbedContents`.

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
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    chat_model: String,
    embed_model: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            api_key: config.gemini_api_key.clone(),
            chat_model: config.chat_model_or_default().to_string(),
            embed_model: config.embed_model_or_default().to_string(),
            client,
        }
    }

    /// Maps prompt messages to the `contents` array. The API only knows
    /// `user` and `model` roles; the system message travels separately as
    /// `systemInstruction`. An image rides on the final user turn.
    fn build_body(messages: &[ChatMessage], image: Option<&ImagePart>) -> Value {
        let system: Vec<&ChatMessage> = messages.iter().filter(|m| m.role == "system").collect();
        let mut contents: Vec<Value> = Vec::new();

        for message in messages.iter().filter(|m| m.role != "system") {
            let role = if message.role == "model" { "model" } else { "user" };
            contents.push(json!({
                "role": role,
                "parts": [{ "text": message.content }],
            }));
        }

        if let (Some(image), Some(last)) = (image, contents.last_mut()) {
            if last["role"] == "user" {
                if let Some(parts) = last["parts"].as_array_mut() {
                    parts.push(json!({
                        "inline_data": {
                            "mime_type": image.mime_type,
                            "data": image.data,
                        }
                    }));
                }
            }
        }

        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            let joined = system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            body["systemInstruction"] = json!({ "parts": [{ "text": joined }] });
        }
        body
    }

    fn extract_text(payload: &Value) -> String {
        payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.embed_model, self.api_key
        );

        let requests: Vec<Value> = inputs
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.embed_model),
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();

        let res = self
            .client
            .post(&url)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!(
                "Gemini embed failed ({status}): {text}"
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;
        let embeddings = payload["embeddings"]
            .as_array()
            .ok_or_else(|| ApiError::Provider("Gemini embed: missing embeddings".to_string()))?
            .iter()
            .map(|item| {
                item["values"]
                    .as_array()
                    .map(|vals| {
                        vals.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect::<Vec<f32>>()
                    })
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();

        if embeddings.len() != inputs.len() {
            return Err(ApiError::Provider(format!(
                "Gemini embed: expected {} vectors, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        image: Option<ImagePart>,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.chat_model, self.api_key
        );
        let body = Self::build_body(&messages, image.as_ref());

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
                "Gemini stream failed ({status}): {text}"
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

                // SSE events are newline-delimited; keep the trailing
                // partial line for the next network chunk.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(payload) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };

                    let text = Self::extract_text(&payload);
                    if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                        // Receiver gone: consumer cancelled, stop reading.
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn complete(&self, prompt: &str) -> Result<String, ApiError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.chat_model, self.api_key
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
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
                "Gemini completion failed ({status}): {text}"
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;
        Ok(Self::extract_text(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_separates_system_instruction_from_contents() {
        let messages = vec![
            ChatMessage::system("Answer from context."),
            ChatMessage::user("Hi"),
            ChatMessage::model("Hello"),
            ChatMessage::user("What is X?"),
        ];

        let body = GeminiProvider::build_body(&messages, None);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Answer from context."
        );
    }

    #[test]
    fn image_attaches_to_final_user_turn() {
        let messages = vec![ChatMessage::user("Describe this image")];
        let image = ImagePart {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };

        let body = GeminiProvider::build_body(&messages, Some(&image));
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn extract_text_joins_candidate_parts() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hel" }, { "text": "lo" }] }
            }]
        });
        assert_eq!(GeminiProvider::extract_text(&payload), "Hello");
        assert_eq!(GeminiProvider::extract_text(&json!({})), "");
    }
}
