//! Fallback parsing of tool calls embedded in message content
//!
//! Small local models frequently answer a tool-enabled request with the call
//! written out as JSON in `content` instead of the `tool_calls` array. The
//! registry tries each known format in priority order.

use serde::Deserialize;

use super::ToolCall;

/// Trait for parsing tool calls from content
pub trait ToolCallParser: Send + Sync {
    /// Attempt to parse content as a tool call
    fn parse(&self, content: &str) -> Option<ToolCall>;

    /// Parser name for logging
    fn name(&self) -> &'static str;

    /// Priority (higher = try first)
    fn priority(&self) -> u32;
}

fn object_or_empty(value: serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        serde_json::json!({})
    } else {
        value
    }
}

/// `{"name": "...", "arguments": {...}}`, also accepting `parameters`
/// (the shape llama3.x prints)
pub struct StandardParser;

#[derive(Deserialize)]
struct StandardFormat {
    name: String,
    #[serde(default, alias = "parameters")]
    arguments: serde_json::Value,
}

impl ToolCallParser for StandardParser {
    fn parse(&self, content: &str) -> Option<ToolCall> {
        let parsed: StandardFormat = serde_json::from_str(content).ok()?;
        Some(ToolCall::new(parsed.name, object_or_empty(parsed.arguments)))
    }

    fn name(&self) -> &'static str {
        "StandardParser"
    }

    fn priority(&self) -> u32 {
        100
    }
}

/// `{"tool": "...", "args": {...}}`
pub struct ToolArgsParser;

#[derive(Deserialize)]
struct ToolArgsFormat {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl ToolCallParser for ToolArgsParser {
    fn parse(&self, content: &str) -> Option<ToolCall> {
        let parsed: ToolArgsFormat = serde_json::from_str(content).ok()?;
        Some(ToolCall::new(parsed.tool, object_or_empty(parsed.args)))
    }

    fn name(&self) -> &'static str {
        "ToolArgsParser"
    }

    fn priority(&self) -> u32 {
        50
    }
}

/// Registry of tool call parsers
pub struct ToolCallParserRegistry {
    parsers: Vec<Box<dyn ToolCallParser>>,
}

impl Default for ToolCallParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallParserRegistry {
    /// Create a registry with all built-in parsers
    pub fn new() -> Self {
        let mut parsers: Vec<Box<dyn ToolCallParser>> =
            vec![Box::new(ToolArgsParser), Box::new(StandardParser)];
        parsers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        Self { parsers }
    }

    /// Try to parse content as a tool call
    ///
    /// Returns the call and the name of the parser that matched. Markdown
    /// code fences around the JSON are ignored.
    pub fn parse(&self, content: &str) -> Option<(ToolCall, &'static str)> {
        let content = strip_code_fence(content.trim());
        if !content.starts_with('{') {
            return None;
        }

        self.parsers
            .iter()
            .find_map(|parser| parser.parse(content).map(|call| (call, parser.name())))
    }

    pub fn parser_names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
