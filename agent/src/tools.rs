//! Tool sets offered to an orchestrating persona

use std::collections::BTreeMap;

use crate::cancel::CancellationToken;
use crate::capability::Capability;
use crate::error::{AgentError, Result};
use crate::llm::{ToolCall, ToolDefinition};
use crate::schema::Fields;

/// Named tools, keyed by capability id
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Capability>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any with the same id
    pub fn with_tool(mut self, tool: Capability) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: Capability) {
        let id = tool.id().to_string();
        if self.tools.insert(id.clone(), tool).is_some() {
            tracing::warn!(tool = %id, "Replaced an existing tool with the same id");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for the backend
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(Capability::definition).collect()
    }

    /// Execute a tool call requested by a planner
    pub async fn call(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<Fields> {
        let name = call.name();
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        tracing::info!(tool = %name, "Executing tool");

        let input = tool
            .input_schema()
            .validate_value(&format!("{} input", name), call.arguments())?;
        let output = tool.invoke(input, cancel).await?;

        tracing::info!(tool = %name, "Tool returned");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    fn upper_tool() -> Capability {
        Capability::from_fn(
            "shout",
            "Upper-cases text",
            Schema::new().string("text", "Input text"),
            Schema::new().string("text", "Upper-cased text"),
            |input: Fields| async move {
                let text = input["text"].as_str().unwrap_or_default().to_uppercase();
                let mut out = Fields::new();
                out.insert("text".into(), json!(text));
                Ok(out)
            },
        )
    }

    #[tokio::test]
    async fn test_call_known_tool() {
        let tools = ToolSet::new().with_tool(upper_tool());
        let call = ToolCall::new("shout", json!({"text": "hello"}));

        let output = tools.call(&call, &CancellationToken::new()).await.unwrap();
        assert_eq!(output["text"], "HELLO");
    }

    #[test]
    fn test_call_unknown_tool() {
        let tools = ToolSet::new().with_tool(upper_tool());
        let call = ToolCall::new("whisper", json!({}));

        let err = tokio_test::block_on(tools.call(&call, &CancellationToken::new())).unwrap_err();
        assert_eq!(err, AgentError::UnknownTool("whisper".to_string()));
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let tools = ToolSet::new().with_tool(upper_tool());
        let call = ToolCall::new("shout", json!("hello"));

        let err = tools.call(&call, &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_register_replaces_same_id() {
        let replacement = Capability::from_fn(
            "shout",
            "Upper-cases text loudly",
            Schema::new().string("text", "Input text"),
            Schema::new().string("text", "Upper-cased text"),
            |input: Fields| async move { Ok(input) },
        );
        let tools = ToolSet::new().with_tool(upper_tool()).with_tool(replacement);

        assert_eq!(tools.len(), 1);
        assert_eq!(tools.get("shout").unwrap().description(), "Upper-cases text loudly");
    }

    #[test]
    fn test_definitions() {
        let tools = ToolSet::new().with_tool(upper_tool());
        let defs = tools.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "shout");
        assert_eq!(tools.names().collect::<Vec<_>>(), vec!["shout"]);
    }
}
