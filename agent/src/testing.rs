//! Scripted backend for tests
//!
//! Available to this crate's tests and, behind the `test-util` feature, to
//! dependent crates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::llm::{ChatBackend, ChatRequest, ChatResponse, Role, ToolCall};

type Responder = Box<dyn Fn(&ChatRequest) -> Result<ChatResponse> + Send + Sync>;

/// A backend that replays scripted replies and records every request
///
/// Scripted replies are consumed first; once exhausted the responder (if any)
/// answers. With neither, calls fail with a backend error.
pub struct MockBackend {
    model: String,
    script: Mutex<VecDeque<Result<ChatResponse>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Replies `echo: <last user message>` to every request
    pub fn echo() -> Self {
        Self::new().responder(|request| {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse::text(format!("echo: {}", last_user)))
        })
    }

    /// Queue a plain text reply
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(ChatResponse::text(text)))
    }

    /// Queue a reply requesting tool calls
    pub fn reply_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Ok(ChatResponse::calls(calls)))
    }

    /// Queue a backend failure
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(AgentError::Backend(message.into())))
    }

    /// Answer with `f` once the script is exhausted
    pub fn responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<ChatResponse> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, reply: Result<ChatResponse>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// User-role contents of every request, in order
    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.messages.iter().rev().find(|m| m.role == Role::User))
            .map(|m| m.content.clone())
            .collect()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match (scripted, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(&request),
            (None, None) => Err(AgentError::backend("mock backend has no scripted reply")),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
