//! LLM runtime client.
//!
//! The model server is an external collaborator reached over HTTP (an
//! Ollama-compatible local endpoint): `POST /api/chat` with `stream: true`
//! yields newline-delimited JSON, one token per line; `GET /api/tags`
//! enumerates installed models. The client exposes the stream as a pull
//! iterator so the shaping job consumes tokens in generation order.

pub mod format;
pub mod prompts;
pub mod shaping;
pub mod stream;

use std::collections::VecDeque;

use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use self::prompts::SamplingParams;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model unavailable: {0}")]
    NotLoaded(String),
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("model stream truncated: {0}")]
    StreamTruncated(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

pub struct LlmClient {
    endpoint: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Installed models, for `MODELS_LIST`. An unreachable server yields an
    /// empty list; the caller falls back to the configured selections.
    pub async fn list_models(&self) -> Vec<ModelInfo> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Model enumeration failed: {}", e);
                return Vec::new();
            }
        };
        let json: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Model list parse failed: {}", e);
                return Vec::new();
            }
        };
        json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .map(|name| ModelInfo {
                        id: name.to_string(),
                        name: name.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Open a streaming chat generation.
    pub async fn chat_stream(
        &self,
        model: &str,
        system: &str,
        user: &str,
        params: SamplingParams,
    ) -> Result<TokenStream, LlmError> {
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: true,
            options: ChatOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                num_predict: params.max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.endpoint);
        debug!(model, url = %url, "Starting LLM generation");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::NotLoaded(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::GenerationFailed(format!(
                "model server returned {status}: {body}"
            )));
        }

        Ok(TokenStream {
            bytes: Box::pin(response.bytes_stream()),
            line_buf: String::new(),
            queued: VecDeque::new(),
            saw_done: false,
            exhausted: false,
        })
    }
}

type ByteStream = std::pin::Pin<
    Box<dyn futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
>;

/// Pull-style token iterator over the NDJSON response body.
pub struct TokenStream {
    bytes: ByteStream,
    line_buf: String,
    queued: VecDeque<String>,
    saw_done: bool,
    exhausted: bool,
}

impl TokenStream {
    /// Next token in generation order; `Ok(None)` when generation completed.
    pub async fn next_token(&mut self) -> Result<Option<String>, LlmError> {
        loop {
            if let Some(token) = self.queued.pop_front() {
                return Ok(Some(token));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    self.line_buf.push_str(&String::from_utf8_lossy(&chunk));
                    self.drain_lines()?;
                }
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Err(LlmError::StreamTruncated(e.to_string()));
                }
                None => {
                    self.exhausted = true;
                    if !self.line_buf.trim().is_empty() {
                        let rest = std::mem::take(&mut self.line_buf);
                        self.parse_line(rest.trim())?;
                    }
                    if !self.saw_done {
                        return Err(LlmError::StreamTruncated(
                            "stream ended before completion".into(),
                        ));
                    }
                }
            }
        }
    }

    fn drain_lines(&mut self) -> Result<(), LlmError> {
        while let Some(pos) = self.line_buf.find('\n') {
            let line = self.line_buf[..pos].trim().to_string();
            self.line_buf.drain(..=pos);
            if !line.is_empty() {
                self.parse_line(&line)?;
            }
        }
        Ok(())
    }

    fn parse_line(&mut self, line: &str) -> Result<(), LlmError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| LlmError::GenerationFailed(format!("bad stream line: {e}")))?;
        if let Some(error) = value["error"].as_str() {
            return Err(LlmError::GenerationFailed(error.to_string()));
        }
        if let Some(content) = value["message"]["content"].as_str() {
            if !content.is_empty() {
                self.queued.push_back(content.to_string());
            }
        }
        if value["done"].as_bool() == Some(true) {
            self.saw_done = true;
            self.exhausted = true;
        }
        Ok(())
    }
}
