//! Planners decide what a delegating orchestrator does next
//!
//! The orchestrator's instructions describe a preferred tool order in natural
//! language, but nothing enforces it: a planner looks at the conversation so
//! far and either answers or asks for tool calls.
//!
//! - [`BackendPlanner`] lets the model decide (native tool calls, with a
//!   fallback for calls written into the message content)
//! - [`SequencePlanner`] calls a fixed list of tools in order, for
//!   deterministic runs and tests

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::{cancellable, CancellationToken};
use crate::error::{AgentError, Result};
use crate::llm::parsers::ToolCallParserRegistry;
use crate::llm::{ChatRequest, Message, Role, ToolCall, ToolDefinition};
use crate::persona::Persona;
use crate::schema::Fields;

/// What the planner wants to happen next
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerAction {
    /// Finish with this text
    Respond(String),
    /// Run these tools, then ask again
    CallTools {
        /// Any text the model produced alongside the calls
        content: String,
        calls: Vec<ToolCall>,
    },
}

/// Inputs available to a planner on each iteration
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub persona: &'a Persona,
    /// System prompt, history, current prompt and tool traffic so far
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    /// 1-based iteration number
    pub iteration: usize,
}

impl PlanContext<'_> {
    /// Messages after the current user prompt
    pub fn current_turn(&self) -> &[Message] {
        let start = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .map_or(0, |i| i + 1);
        &self.messages[start..]
    }

    /// The current user prompt
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    fn knows_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.function.name == name)
    }
}

/// Decides the orchestrator's next action
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_action(
        &self,
        ctx: PlanContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<PlannerAction>;

    /// Planner name for logging
    fn name(&self) -> &'static str;
}

/// Planner that asks the persona's backend
#[derive(Default)]
pub struct BackendPlanner {
    parsers: ToolCallParserRegistry,
}

impl BackendPlanner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Planner for BackendPlanner {
    async fn next_action(
        &self,
        ctx: PlanContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<PlannerAction> {
        let request = ChatRequest::new(ctx.messages.to_vec()).with_tools(ctx.tools.to_vec());
        let response = cancellable(cancel, ctx.persona.model().chat(request)).await?;

        if !response.tool_calls.is_empty() {
            return Ok(PlannerAction::CallTools {
                content: response.content,
                calls: response.tool_calls,
            });
        }

        // Fallback: model wrote the call as JSON in content (common with llama3.x)
        if let Some((call, parser)) = self.parsers.parse(&response.content) {
            if ctx.knows_tool(call.name()) {
                tracing::info!("Parsed tool call from content using {}: {}", parser, call.name());
                return Ok(PlannerAction::CallTools {
                    content: String::new(),
                    calls: vec![call],
                });
            }
        }

        Ok(PlannerAction::Respond(response.content))
    }

    fn name(&self) -> &'static str {
        "backend"
    }
}

/// Planner that calls a fixed list of tools in order
///
/// The first tool receives `{prompt_field: <user prompt>}`; each later tool
/// receives the previous tool's output object. After the last tool the
/// planner responds with the string value of `answer_field` from its output.
#[derive(Debug, Clone)]
pub struct SequencePlanner {
    tools: Vec<String>,
    prompt_field: String,
    answer_field: String,
}

impl SequencePlanner {
    pub fn new(
        tools: impl IntoIterator<Item = impl Into<String>>,
        prompt_field: impl Into<String>,
        answer_field: impl Into<String>,
    ) -> Self {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            prompt_field: prompt_field.into(),
            answer_field: answer_field.into(),
        }
    }

    fn parse_output(content: &str) -> Result<Fields> {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(fields)) => Ok(fields),
            _ => Err(AgentError::validation(
                "sequence planner",
                "previous tool result is not a JSON object",
            )),
        }
    }
}

#[async_trait]
impl Planner for SequencePlanner {
    async fn next_action(
        &self,
        ctx: PlanContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<PlannerAction> {
        let results: Vec<&Message> = ctx
            .current_turn()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        let done = results.len();

        if let Some(next) = self.tools.get(done) {
            let arguments = match results.last() {
                Some(previous) => Self::parse_output(&previous.content)?,
                None => {
                    let mut first = Fields::new();
                    first.insert(
                        self.prompt_field.clone(),
                        Value::String(ctx.prompt().unwrap_or_default().to_string()),
                    );
                    first
                }
            };

            return Ok(PlannerAction::CallTools {
                content: String::new(),
                calls: vec![ToolCall::new(next.clone(), Value::Object(arguments))],
            });
        }

        let answer = match results.last() {
            Some(last) => Self::parse_output(&last.content)?
                .get(&self.answer_field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    AgentError::validation(
                        "sequence planner",
                        format!("last tool result has no string field '{}'", self.answer_field),
                    )
                })?,
            None => String::new(),
        };

        Ok(PlannerAction::Respond(answer))
    }

    fn name(&self) -> &'static str {
        "sequence"
    }
}
