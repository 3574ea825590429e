//! Ollama backend over direct HTTP
//!
//! Talks to `/api/chat` with `stream: false`, which gives native tool calling
//! support for models that have it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatRequest, ChatResponse, Message, ToolCall, ToolDefinition};
use crate::error::{AgentError, Result};

/// Default Ollama server URL
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default request timeout for a single chat call
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Information about an available model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<ModelInfo>,
}

/// Reduce a user-supplied URL to `scheme://host:port`
fn base_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("localhost");
            let port = parsed.port().unwrap_or(11434);
            format!("{}://{}:{}", parsed.scheme(), host, port)
        }
        Err(e) => {
            tracing::warn!("Invalid Ollama URL {:?} ({}), using {}", url, e, DEFAULT_OLLAMA_URL);
            DEFAULT_OLLAMA_URL.to_string()
        }
    }
}

/// List available models from Ollama
pub async fn list_models(ollama_url: &str) -> Result<Vec<ModelInfo>> {
    let api_url = format!("{}/api/tags", base_url(ollama_url));
    let response = reqwest::Client::new().get(&api_url).send().await?;

    if !response.status().is_success() {
        return Err(AgentError::backend(format!(
            "Ollama API error {} listing models",
            response.status()
        )));
    }

    let tags: OllamaTagsResponse = response.json().await?;
    Ok(tags.models)
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// Ollama client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    http_client: reqwest::Client,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(url: &str, model: &str) -> Self {
        Self {
            base_url: base_url(url),
            http_client: reqwest::Client::new(),
            model: model.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages: &request.messages,
            tools: &request.tools,
            stream: false,
        };

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat request to Ollama"
        );

        let url = format!("{}/api/chat", self.base_url);
        let started = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::backend(format!("Ollama API error {}: {}", status, body)));
        }

        let raw_body = response.text().await?;
        let parsed: OllamaChatResponse = serde_json::from_str(&raw_body)
            .map_err(|e| AgentError::backend(format!("Failed to parse Ollama response: {}", e)))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            content_len = parsed.message.content.len(),
            tool_calls = parsed.message.tool_calls.len(),
            "Ollama response"
        );

        Ok(ChatResponse {
            content: parsed.message.content,
            tool_calls: parsed.message.tool_calls,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
