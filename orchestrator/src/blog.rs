//! Blog-post personas, tools and workflow
//!
//! Two ways to get from a topic to edited copy:
//! - `multi-agent-workflow`: copywriterStep then editorStep, always in that order
//! - the publisher orchestrator: a persona given `copywriter-agent` and
//!   `editor-agent` tools and told (not forced) to call them in that order

use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use quill_agent::llm::ChatBackend;
use quill_agent::{
    Capability, Orchestrator, Persona, PersonaConfig, PersonaRegistry, PersonaTask, Schema, ToolSet,
};

use crate::prompts;
use crate::workflow::{Step, Workflow};

pub const WORKFLOW_ID: &str = "multi-agent-workflow";
pub const COPYWRITER_TOOL: &str = "copywriter-agent";
pub const EDITOR_TOOL: &str = "editor-agent";
pub const COPYWRITER_STEP: &str = "copywriterStep";
pub const EDITOR_STEP: &str = "editorStep";

/// Registry keys of the built-in personas
pub const COPYWRITER: &str = "copywriter";
pub const EDITOR: &str = "editor";
pub const PUBLISHER: &str = "publisher";

/// Workflow input and copywriter tool input
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TopicInput {
    /// Blog post topic
    pub topic: String,
}

/// Output of the copywriter (and input of the editor)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CopyOutput {
    /// Blog post copy
    pub copy: String,
}

/// Workflow output
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinalCopyOutput {
    /// Blog post copy
    #[serde(rename = "finalCopy")]
    pub final_copy: String,
}

/// The built-in persona definitions
pub fn default_personas() -> PersonaRegistry {
    let persona = |name: &str, instructions: &str, display: &str| {
        PersonaConfig::new(name, instructions).with_display_name(display)
    };

    PersonaRegistry::new()
        .with_persona(persona(COPYWRITER, prompts::COPYWRITER_PROMPT, "Copywriter"))
        .with_persona(persona(EDITOR, prompts::EDITOR_PROMPT, "Editor"))
        .with_persona(persona(PUBLISHER, prompts::PUBLISHER_PROMPT, "Publisher Agent"))
}

/// The three personas, bound to backends
#[derive(Debug, Clone)]
pub struct BlogPersonas {
    pub copywriter: Persona,
    pub editor: Persona,
    pub publisher: Persona,
}

impl BlogPersonas {
    /// Build from a registry; `backend_for` receives each persona's model override
    pub fn from_registry<F>(registry: &PersonaRegistry, backend_for: F) -> Result<Self>
    where
        F: Fn(Option<&str>) -> Arc<dyn ChatBackend>,
    {
        Ok(Self {
            copywriter: registry.build(COPYWRITER, &backend_for)?,
            editor: registry.build(EDITOR, &backend_for)?,
            publisher: registry.build(PUBLISHER, &backend_for)?,
        })
    }

    /// Default personas all sharing one backend
    pub fn with_backend(backend: Arc<dyn ChatBackend>) -> Self {
        let persona =
            |name: &str, instructions: &str| Persona::new(name, instructions, backend.clone());
        Self {
            copywriter: persona("Copywriter", prompts::COPYWRITER_PROMPT),
            editor: persona("Editor", prompts::EDITOR_PROMPT),
            publisher: persona("Publisher Agent", prompts::PUBLISHER_PROMPT),
        }
    }
}

pub fn copywriter_tool(copywriter: Persona) -> Result<Capability> {
    Ok(Capability::new(
        COPYWRITER_TOOL,
        "Calls the copywriter agent to write blog post copy.",
        Schema::of::<TopicInput>()?,
        Schema::of::<CopyOutput>()?,
        PersonaTask::new(copywriter, prompts::COPYWRITER_TASK, "copy"),
    ))
}

pub fn editor_tool(editor: Persona) -> Result<Capability> {
    Ok(Capability::new(
        EDITOR_TOOL,
        "Calls the editor agent to edit blog post copy.",
        Schema::of::<CopyOutput>()?,
        Schema::of::<CopyOutput>()?,
        PersonaTask::new(editor, prompts::EDITOR_TASK, "copy"),
    ))
}

pub fn copywriter_step(copywriter: Persona) -> Result<Step> {
    Ok(Capability::new(
        COPYWRITER_STEP,
        "Write blog post copy about the topic",
        Schema::of::<TopicInput>()?,
        Schema::of::<CopyOutput>()?,
        PersonaTask::new(copywriter, prompts::COPYWRITER_TASK, "copy")
            .require("topic", "Topic not found in trigger data"),
    ))
}

pub fn editor_step(editor: Persona) -> Result<Step> {
    Ok(Capability::new(
        EDITOR_STEP,
        "Edit the blog post copy",
        Schema::new().string("copy", ""),
        Schema::new().string("finalCopy", ""),
        PersonaTask::new(editor, prompts::EDITOR_TASK, "finalCopy")
            .require("copy", "Copy not found in trigger data"),
    ))
}

/// `multi-agent-workflow`: `{topic}` -> copywriterStep -> editorStep -> `{finalCopy}`
pub fn multi_agent_workflow(personas: &BlogPersonas) -> Result<Workflow> {
    let workflow = Workflow::builder(WORKFLOW_ID)
        .description("Write blog post copy about a topic, then edit it")
        .input_schema(Schema::of::<TopicInput>()?)
        .output_schema(Schema::of::<FinalCopyOutput>()?)
        .then(copywriter_step(personas.copywriter.clone())?)
        .then(editor_step(personas.editor.clone())?)
        .commit()?;
    Ok(workflow)
}

/// The publisher persona with both blog tools attached
///
/// Memory is left to the caller (`Orchestrator::with_memory`).
pub fn publisher_agent(personas: &BlogPersonas) -> Result<Orchestrator> {
    let tools = ToolSet::new()
        .with_tool(copywriter_tool(personas.copywriter.clone())?)
        .with_tool(editor_tool(personas.editor.clone())?);

    Ok(Orchestrator::new(personas.publisher.clone()).with_tools(tools))
}

/// Prompt sent to the publisher for a topic
pub fn publisher_prompt(topic: &str) -> String {
    format!("Write a blog post about {}. Only return the final edited copy.", topic)
}
