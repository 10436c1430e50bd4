//! Model backend client.
//!
//! One backend is chosen at startup by probing a fixed preference
//! order: a local llama.cpp server, then LM Studio, then Ollama. The
//! choice is never revisited mid-run; request failures retry against
//! the same backend. A failed vision request falls back to one
//! text-only attempt so a model without image support still extracts.

pub mod prompts;
mod response;

pub use response::{parse_response, LlmFields};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BackendSettings;
use crate::pdf::QualityReport;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(120);
const VISUAL_TIMEOUT: Duration = Duration::from_secs(60);
/// Retries after the first attempt, with a fixed backoff.
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("No model backend reachable")]
    NoBackend,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    LlamaServer,
    LmStudio,
    Ollama,
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LlamaServer => "llama-server",
            Self::LmStudio => "LM Studio",
            Self::Ollama => "Ollama",
        }
    }
}

/// Whether a request carries page images. Vision failures downgrade to
/// [`AttemptMode::TextOnly`] exactly once, no recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptMode {
    Vision,
    TextOnly,
}

/// Per-document extraction request.
pub struct ExtractionRequest<'a> {
    pub text: &'a str,
    pub filename: &'a str,
    pub filename_date: Option<&'a str>,
    pub images_b64: &'a [String],
    pub quality: Option<&'a QualityReport>,
    pub adaptive_hint: Option<&'a str>,
}

/// Extraction surface consumed by the document processor.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<LlmFields, LlmError>;

    /// Low-temperature audit of an earlier extraction; returns only
    /// corrected fields.
    async fn verify(
        &self,
        fields: &LlmFields,
        text: &str,
        filename: &str,
    ) -> Result<LlmFields, LlmError>;

    /// Ask a vision model which operator entity the page belongs to.
    /// Returns the raw model reply for keyword mapping by the caller.
    async fn detect_entity_visual(&self, image_b64: &str) -> Result<String, LlmError>;
}

/// HTTP chat client over the selected backend.
pub struct ChatClient {
    http: reqwest::Client,
    backend: Backend,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    doc_types: Vec<String>,
    company_types: Vec<String>,
}

impl ChatClient {
    /// Probe the backends in preference order and connect to the first
    /// one that answers.
    pub async fn connect(
        settings: &BackendSettings,
        doc_types: Vec<String>,
        company_types: Vec<String>,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let candidates = [
            (Backend::LlamaServer, settings.llama_server_url.as_str()),
            (Backend::LmStudio, settings.lmstudio_url.as_str()),
            (Backend::Ollama, settings.ollama_url.as_str()),
        ];

        for (backend, url) in candidates {
            let base_url = url.trim_end_matches('/').to_string();
            match probe(&http, backend, &base_url).await {
                Some(model_hint) => {
                    let model = model_hint.unwrap_or_else(|| settings.model.clone());
                    info!("Model backend selected: {} ({})", backend.label(), model);
                    return Ok(Self {
                        http,
                        backend,
                        base_url,
                        model,
                        temperature: settings.temperature,
                        max_tokens: settings.max_tokens,
                        doc_types,
                        company_types,
                    });
                }
                None => debug!("{} not reachable at {}", backend.label(), base_url),
            }
        }
        Err(LlmError::NoBackend)
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat round against the active backend.
    async fn chat(
        &self,
        messages: &[Value],
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        match self.backend {
            Backend::LlamaServer | Backend::LmStudio => {
                let payload = json!({
                    "model": self.model,
                    "messages": messages,
                    "temperature": temperature,
                    "max_tokens": self.max_tokens,
                    "stream": false,
                });
                let resp = self
                    .http
                    .post(format!("{}/v1/chat/completions", self.base_url))
                    .timeout(timeout)
                    .json(&payload)
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(LlmError::Backend(format!("HTTP {}", status)));
                }
                let body: Value = resp.json().await?;
                content_of(&body["choices"][0]["message"]["content"])
            }
            Backend::Ollama => {
                let payload = json!({
                    "model": self.model,
                    "messages": to_ollama_messages(messages),
                    "stream": false,
                    "options": {"temperature": temperature, "num_predict": self.max_tokens},
                });
                let resp = self
                    .http
                    .post(format!("{}/api/chat", self.base_url))
                    .timeout(timeout)
                    .json(&payload)
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(LlmError::Backend(format!("HTTP {}", status)));
                }
                let body: Value = resp.json().await?;
                content_of(&body["message"]["content"])
            }
        }
    }

    /// Chat with the fixed retry budget and backoff.
    async fn chat_with_retry(
        &self,
        messages: &[Value],
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let mut last_error = LlmError::NoBackend;
        for attempt in 0..=MAX_RETRIES {
            match self.chat(messages, temperature, timeout).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("model request failed (attempt {}): {}", attempt + 1, e);
                    last_error = e;
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl Extractor for ChatClient {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<LlmFields, LlmError> {
        let inputs = prompts::PromptInputs {
            text: request.text,
            filename: request.filename,
            filename_date: request.filename_date,
            doc_types: &self.doc_types,
            company_types: &self.company_types,
            quality: request.quality,
            adaptive_hint: request.adaptive_hint,
        };

        let mut mode = if request.images_b64.is_empty() {
            AttemptMode::TextOnly
        } else {
            AttemptMode::Vision
        };

        loop {
            let images: &[String] = match mode {
                AttemptMode::Vision => request.images_b64,
                AttemptMode::TextOnly => &[],
            };
            let messages = prompts::extraction_messages(&inputs, images);
            match self
                .chat_with_retry(&messages, self.temperature, EXTRACT_TIMEOUT)
                .await
            {
                Ok(content) => return Ok(parse_response(&content)),
                Err(e) if mode == AttemptMode::Vision => {
                    warn!("vision request failed for {}, retrying text-only: {}", request.filename, e);
                    mode = AttemptMode::TextOnly;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn verify(
        &self,
        fields: &LlmFields,
        text: &str,
        filename: &str,
    ) -> Result<LlmFields, LlmError> {
        let messages = prompts::verification_messages(fields, text, filename);
        let content = self.chat_with_retry(&messages, 0.0, EXTRACT_TIMEOUT).await?;
        Ok(parse_response(&content))
    }

    async fn detect_entity_visual(&self, image_b64: &str) -> Result<String, LlmError> {
        let messages = prompts::entity_detection_messages(image_b64);
        let content = self
            .chat_with_retry(&messages, self.temperature, VISUAL_TIMEOUT)
            .await?;
        Ok(content.trim().to_string())
    }
}

/// Probe one backend; `Some(model_hint)` when reachable.
async fn probe(http: &reqwest::Client, backend: Backend, base_url: &str) -> Option<Option<String>> {
    let url = match backend {
        Backend::LlamaServer | Backend::LmStudio => format!("{}/v1/models", base_url),
        Backend::Ollama => format!("{}/api/tags", base_url),
    };
    let resp = http.get(&url).timeout(PROBE_TIMEOUT).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body: Value = resp.json().await.ok()?;
    let model_hint = match backend {
        Backend::LlamaServer | Backend::LmStudio => body["data"][0]["id"]
            .as_str()
            .map(|s| s.to_string()),
        Backend::Ollama => body["models"][0]["name"].as_str().map(|s| s.to_string()),
    };
    Some(model_hint)
}

fn content_of(value: &Value) -> Result<String, LlmError> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::Backend("missing content in response".to_string()))
}

/// Flatten OpenAI-style content parts into Ollama's message shape:
/// plain text plus a raw base64 images array.
fn to_ollama_messages(messages: &[Value]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = m["role"].as_str().unwrap_or("user");
            match m["content"].as_array() {
                None => json!({"role": role, "content": m["content"].as_str().unwrap_or("")}),
                Some(parts) => {
                    let mut text = String::new();
                    let mut images: Vec<String> = Vec::new();
                    for part in parts {
                        match part["type"].as_str() {
                            Some("text") => {
                                text.push_str(part["text"].as_str().unwrap_or(""));
                            }
                            Some("image_url") => {
                                if let Some(url) = part["image_url"]["url"].as_str() {
                                    if let Some((_, b64)) = url.split_once("base64,") {
                                        images.push(b64.to_string());
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    if images.is_empty() {
                        json!({"role": role, "content": text})
                    } else {
                        json!({"role": role, "content": text, "images": images})
                    }
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_conversion_flattens_parts() {
        let messages = vec![
            json!({"role": "system", "content": "sys"}),
            json!({"role": "user", "content": [
                {"type": "text", "text": "hello"},
                {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,QUJD"}},
            ]}),
        ];
        let out = to_ollama_messages(&messages);
        assert_eq!(out[0]["content"], "sys");
        assert_eq!(out[1]["content"], "hello");
        assert_eq!(out[1]["images"][0], "QUJD");
    }
}
