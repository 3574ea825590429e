//! Personas - fixed system instructions bound to a model backend

use std::sync::Arc;
use std::time::Instant;

use crate::cancel::{cancellable, CancellationToken};
use crate::error::{AgentError, Result};
use crate::llm::{ChatBackend, ChatRequest, Message};

/// Text produced by a persona or orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
}

/// A named persona: system instructions plus a backend handle
///
/// Immutable once built; cloning shares the backend.
#[derive(Clone)]
pub struct Persona {
    name: String,
    instructions: String,
    model: Arc<dyn ChatBackend>,
}

impl std::fmt::Debug for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persona")
            .field("name", &self.name)
            .field("model", &self.model.model())
            .finish()
    }
}

impl Persona {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn model(&self) -> &Arc<dyn ChatBackend> {
        &self.model
    }

    /// Same persona on a different backend
    pub fn with_model(&self, model: Arc<dyn ChatBackend>) -> Self {
        Self {
            model,
            ..self.clone()
        }
    }

    /// Messages sent for a single-turn prompt
    pub fn messages_for(&self, prompt: &str) -> Vec<Message> {
        vec![Message::system(&self.instructions), Message::user(prompt)]
    }

    /// Generate a reply to `prompt`
    ///
    /// The backend's text is returned unmodified. Backend failures propagate;
    /// nothing is retried.
    pub async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<Generation> {
        if prompt.trim().is_empty() {
            return Err(AgentError::validation(
                format!("{} prompt", self.name),
                "prompt must not be empty",
            ));
        }

        tracing::info!(persona = %self.name, model = %self.model.model(), "Generating");
        let started = Instant::now();

        let request = ChatRequest::new(self.messages_for(prompt));
        let response = cancellable(cancel, self.model.chat(request)).await?;

        tracing::info!(
            persona = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = response.content.len(),
            "Generation complete"
        );

        Ok(Generation {
            text: response.content,
        })
    }
}
