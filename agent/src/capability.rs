//! Schema-checked callable units
//!
//! A [`Capability`] is the shape shared by tools (offered to an orchestrating
//! planner) and workflow steps (run in a fixed order): an id, a description,
//! input and output schemas, and an executor.
//!
//! `invoke` validates the input before the executor runs and the output
//! after it returns, so a successful call always matches `output_schema`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::{cancellable, CancellationToken};
use crate::error::{AgentError, Result};
use crate::llm::ToolDefinition;
use crate::persona::Persona;
use crate::schema::{Fields, Schema};

/// The body of a capability
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, input: Fields, cancel: &CancellationToken) -> Result<Fields>;
}

/// Executor backed by an async closure
pub struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Execute for FnExecutor<F>
where
    F: Fn(Fields) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Fields>> + Send,
{
    async fn execute(&self, input: Fields, cancel: &CancellationToken) -> Result<Fields> {
        cancellable(cancel, (self.f)(input)).await
    }
}

/// A schema-validated callable unit
#[derive(Clone)]
pub struct Capability {
    id: String,
    description: String,
    input_schema: Schema,
    output_schema: Schema,
    executor: Arc<dyn Execute>,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .finish()
    }
}

impl Capability {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
        executor: impl Execute + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_schema,
            output_schema,
            executor: Arc::new(executor),
        }
    }

    /// Build a capability from an async closure
    pub fn from_fn<F, Fut>(
        id: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
        f: F,
    ) -> Self
    where
        F: Fn(Fields) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fields>> + Send + 'static,
    {
        Self::new(id, description, input_schema, output_schema, FnExecutor { f })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    /// Validate `input`, run the executor, validate its output
    pub async fn invoke(&self, input: Fields, cancel: &CancellationToken) -> Result<Fields> {
        self.input_schema
            .validate(&format!("{} input", self.id), &input)?;

        let output = self.executor.execute(input, cancel).await?;

        self.output_schema
            .validate(&format!("{} output", self.id), &output)?;
        Ok(output)
    }

    /// Describe this capability as a backend tool definition
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.id, &self.description, self.input_schema.to_json_schema())
    }
}

/// A precondition on an input field
#[derive(Debug, Clone)]
struct Guard {
    field: String,
    message: String,
}

/// Executor that renders a prompt template and asks one persona
///
/// The template uses `{field}` placeholders filled from the input. The
/// persona's text is returned under `output_field`.
#[derive(Debug, Clone)]
pub struct PersonaTask {
    persona: Persona,
    template: String,
    output_field: String,
    guards: Vec<Guard>,
}

impl PersonaTask {
    pub fn new(
        persona: Persona,
        template: impl Into<String>,
        output_field: impl Into<String>,
    ) -> Self {
        Self {
            persona,
            template: template.into(),
            output_field: output_field.into(),
            guards: Vec::new(),
        }
    }

    /// Fail with `message` before calling the persona when `field` is falsy
    ///
    /// Falsy means absent, null, `false`, `0` or the empty string.
    pub fn require(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.guards.push(Guard {
            field: field.into(),
            message: message.into(),
        });
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn output_field(&self) -> &str {
        &self.output_field
    }

    fn check_guards(&self, input: &Fields) -> Result<()> {
        for guard in &self.guards {
            if input.get(&guard.field).is_none_or(is_falsy) {
                return Err(AgentError::guard(&guard.message));
            }
        }
        Ok(())
    }

    /// Fill `{field}` placeholders from `input`
    ///
    /// Substitution is a single pass, so placeholder-like text inside a
    /// substituted value is left alone. Braces that do not name a field in
    /// the input are kept verbatim.
    pub fn render(&self, input: &Fields) -> String {
        render_template(&self.template, input)
    }
}

#[async_trait]
impl Execute for PersonaTask {
    async fn execute(&self, input: Fields, cancel: &CancellationToken) -> Result<Fields> {
        self.check_guards(&input)?;

        let prompt = self.render(&input);
        let generation = self.persona.generate(&prompt, cancel).await?;

        let mut output = Fields::new();
        output.insert(self.output_field.clone(), Value::String(generation.text));
        Ok(output)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64().is_none_or(|f| f == 0.0 || f.is_nan()),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Placeholder name right after a `{`, with the index of its closing `}`
///
/// Names are non-empty runs of alphanumerics and `_`.
fn placeholder_at(after: &str) -> Option<(&str, usize)> {
    let close = after.find('}')?;
    let name = &after[..close];
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some((name, close))
}

/// `{name}` placeholders in a template, in order of first use
///
/// Scans exactly as [`render_template`] does, so every name listed here is
/// one rendering would substitute.
pub fn template_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match placeholder_at(after) {
            Some((name, close)) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
                rest = &after[close + 1..];
            }
            None => rest = after,
        }
    }

    names
}

/// Single-pass `{name}` substitution
pub fn render_template(template: &str, input: &Fields) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let substituted = placeholder_at(after)
            .and_then(|(name, close)| input.get(name).map(|value| (close, value)));

        match substituted {
            Some((close, value)) => {
                match value {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
