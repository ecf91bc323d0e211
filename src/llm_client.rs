//! Adapter for the native Ollama wire contract (`/api/generate`, `/api/chat`).
//!
//! Diverges deliberately from this crate's OpenAI-compatible `llm/external.rs` mapping:
//! the target here speaks Ollama's own JSON shape, not `/v1/chat/completions`.

use crate::error::{RagError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_PERMITS: usize = 4;

pub struct LLMClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessageWire],
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct ChatMessageWire {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl LLMClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_seconds + 10))
            .build()
            .map_err(|e| RagError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(timeout_seconds),
            semaphore: Arc::new(Semaphore::new(DEFAULT_PERMITS)),
        })
    }

    /// One-shot completion via `/api/generate`. `max_tokens` maps to `num_predict`.
    pub async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RagError::internal("LLM semaphore closed"))?;

        let endpoint = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature, num_predict: max_tokens },
        };

        let call = self.client.post(&endpoint).json(&body).send();
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RagError::timeout(format!("LLM generate timed out after {:?}", self.timeout)))?
            .map_err(|e| RagError::unavailable(format!("LLM unreachable: {e}")))?;

        let parsed: GenerateResponse = Self::parse_json(response, &endpoint).await?;
        Ok(parsed.response.trim().to_string())
    }

    /// Multi-turn completion via `/api/chat`.
    pub async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RagError::internal("LLM semaphore closed"))?;

        let endpoint = format!("{}/api/chat", self.base_url);
        let wire_messages: Vec<ChatMessageWire> = messages
            .iter()
            .map(|m| ChatMessageWire { role: m.role.clone(), content: m.content.clone() })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages: &wire_messages,
            stream: false,
            options: GenerateOptions { temperature, num_predict: max_tokens },
        };

        let call = self.client.post(&endpoint).json(&body).send();
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RagError::timeout(format!("LLM chat timed out after {:?}", self.timeout)))?
            .map_err(|e| RagError::unavailable(format!("LLM unreachable: {e}")))?;

        let parsed: ChatResponse = Self::parse_json(response, &endpoint).await?;
        Ok(parsed.message.content.trim().to_string())
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response, endpoint: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::unavailable(format!("failed to read response body from {endpoint}: {e}")))?;
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(RagError::unavailable(format!(
                "endpoint {endpoint} returned HTML instead of JSON (HTTP {status}): {preview}"
            )));
        }
        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            RagError::internal(format!("failed to parse JSON from {endpoint} (HTTP {status}): {e}. body: {preview}"))
        })
    }

    /// A deterministic answer built from the retrieved context, used when the LLM is
    /// unreachable so the pipeline still returns a well-formed response.
    pub fn fallback_answer(top_chunk_text: &str) -> String {
        let preview: String = top_chunk_text.chars().take(500).collect();
        format!(
            "I couldn't reach the language model, but here is the most relevant passage I found:\n\n{preview}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_answer_truncates_to_500_chars() {
        let long_text: String = "x".repeat(1000);
        let answer = LLMClient::fallback_answer(&long_text);
        assert!(answer.len() < 1000);
        assert!(answer.contains(&"x".repeat(500)));
    }

    #[test]
    fn client_construction_rejects_nothing_but_builds() {
        let client = LLMClient::new("http://localhost:11434", "llama3", 60);
        assert!(client.is_ok());
    }
}
