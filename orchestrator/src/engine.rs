//! Workflow engine
//!
//! Holds the named workflows available to the CLI:
//! - the built-in `multi-agent-workflow`
//! - custom workflows defined in TOML files, with personas resolved
//!   through a [`PersonaRegistry`]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use quill_agent::llm::ChatBackend;
use quill_agent::capability::template_placeholders;
use quill_agent::{CancellationToken, Capability, Fields, PersonaRegistry, PersonaTask, Schema};

use crate::blog::{self, BlogPersonas};
use crate::workflow::{Workflow, WorkflowError, WorkflowRun};

/// Errors loading or running named workflows
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidDefinition { workflow: String, reason: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// One step of a TOML workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,

    /// Persona registry key
    pub persona: String,

    /// Prompt template with `{field}` placeholders
    pub task: String,

    /// Required string input fields
    #[serde(default)]
    pub input: Vec<String>,

    /// String field the persona's text is returned under
    pub output: String,

    /// Input fields that must be non-empty
    #[serde(default)]
    pub require: Vec<String>,
}

impl StepDefinition {
    /// Input fields: declared ones, or the placeholders used in the task
    fn input_fields(&self) -> Vec<String> {
        if !self.input.is_empty() {
            return self.input.clone();
        }
        template_placeholders(&self.task)
    }
}

/// Guard message for a required field, e.g. "Copy not found in trigger data"
fn missing_message(field: &str) -> String {
    let mut chars = field.chars();
    let capitalised: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{} not found in trigger data", capitalised)
}

/// A workflow defined in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Load workflow from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load workflow from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::ParseError(e.to_string()))
    }

    /// Build a runnable workflow
    pub fn build<F>(
        &self,
        personas: &PersonaRegistry,
        backend_for: F,
    ) -> Result<Workflow, EngineError>
    where
        F: Fn(Option<&str>) -> Arc<dyn ChatBackend>,
    {
        let invalid = |reason: String| EngineError::InvalidDefinition {
            workflow: self.id.clone(),
            reason,
        };

        let mut builder = Workflow::builder(&self.id).description(&self.description);

        for step in &self.steps {
            let persona = personas
                .build(&step.persona, &backend_for)
                .map_err(|e| invalid(format!("step '{}': {}", step.id, e)))?;

            let mut input_schema = Schema::new();
            for field in step.input_fields() {
                input_schema = input_schema.string(field, "");
            }

            let mut task = PersonaTask::new(persona, &step.task, &step.output);
            for field in &step.require {
                task = task.require(field, missing_message(field));
            }

            builder = builder.then(Capability::new(
                &step.id,
                format!("{} via {}", step.id, step.persona),
                input_schema,
                Schema::new().string(&step.output, ""),
                task,
            ));
        }

        Ok(builder.commit()?)
    }
}

/// Load workflow definitions from a directory
///
/// Files that fail to parse are skipped with a warning.
pub fn load_custom_workflows(dir: &Path) -> Result<Vec<WorkflowDefinition>, EngineError> {
    let mut definitions = Vec::new();

    if !dir.exists() {
        return Ok(definitions);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| EngineError::IoError(e.to_string()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            match WorkflowDefinition::from_toml_file(&path) {
                Ok(definition) => definitions.push(definition),
                Err(e) => {
                    tracing::warn!("Failed to load workflow from {:?}: {}", path, e);
                }
            }
        }
    }

    definitions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(definitions)
}

/// Named workflow registry
#[derive(Default)]
pub struct WorkflowEngine {
    workflows: BTreeMap<String, (Workflow, bool)>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with the built-in workflows
    pub fn with_builtins(personas: &BlogPersonas) -> anyhow::Result<Self> {
        let mut engine = Self::new();
        engine.register(blog::multi_agent_workflow(personas)?);
        Ok(engine)
    }

    /// Register a built-in workflow
    pub fn register(&mut self, workflow: Workflow) {
        self.workflows.insert(workflow.id().to_string(), (workflow, false));
    }

    /// Register a custom workflow (replaces a built-in of the same id)
    pub fn register_custom(&mut self, workflow: Workflow) {
        self.workflows.insert(workflow.id().to_string(), (workflow, true));
    }

    /// Build and register every definition in `dir`
    ///
    /// Definitions that cannot be built are skipped with a warning. Returns
    /// the number registered.
    pub fn load_dir<F>(
        &mut self,
        dir: &Path,
        personas: &PersonaRegistry,
        backend_for: F,
    ) -> Result<usize, EngineError>
    where
        F: Fn(Option<&str>) -> Arc<dyn ChatBackend>,
    {
        let mut loaded = 0;
        for definition in load_custom_workflows(dir)? {
            match definition.build(personas, &backend_for) {
                Ok(workflow) => {
                    self.register_custom(workflow);
                    loaded += 1;
                }
                Err(e) => tracing::warn!("Skipping workflow '{}': {}", definition.id, e),
            }
        }
        Ok(loaded)
    }

    /// Get a workflow by name
    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name).map(|(w, _)| w)
    }

    /// List all workflows as `(name, description, is_custom)`, sorted by name
    pub fn list_workflows(&self) -> Vec<(&str, &str, bool)> {
        self.workflows
            .iter()
            .map(|(name, (w, custom))| (name.as_str(), w.description(), *custom))
            .collect()
    }

    /// Run a workflow by name
    pub async fn run(
        &self,
        name: &str,
        input: Fields,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, EngineError> {
        let workflow = self
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        Ok(workflow.run(input, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_agent::testing::MockBackend;
    use quill_agent::PersonaConfig;
    use serde_json::json;
    use std::io::Write;

    const SUMMARISE: &str = r#"
        id = "summarise"
        description = "Summarise blog copy"

        [[steps]]
        id = "summaryStep"
        persona = "editor"
        task = "Summarise: {copy}"
        output = "summary"
        require = ["copy"]
    "#;

    fn personas() -> PersonaRegistry {
        PersonaRegistry::new().with_persona(PersonaConfig::new("editor", "You edit."))
    }

    #[test]
    fn test_stray_brace_does_not_hide_input_field() {
        let step = StepDefinition {
            id: "editStep".to_string(),
            persona: "editor".to_string(),
            task: "Start with { then edit: {copy}".to_string(),
            input: Vec::new(),
            output: "out".to_string(),
            require: Vec::new(),
        };
        assert_eq!(step.input_fields(), vec!["copy"]);

        let definition = WorkflowDefinition {
            id: "stray".to_string(),
            description: String::new(),
            steps: vec![step],
        };
        let backend = Arc::new(MockBackend::echo());
        let shared: Arc<dyn ChatBackend> = backend.clone();
        let workflow = definition.build(&personas(), |_| shared.clone()).unwrap();

        let err = tokio_test::block_on(workflow.run(Fields::new(), &CancellationToken::new()))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
        assert!(err.is_validation());
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_missing_message() {
        assert_eq!(missing_message("copy"), "Copy not found in trigger data");
    }

    #[test]
    fn test_definition_from_toml() {
        let definition = WorkflowDefinition::from_toml(SUMMARISE).unwrap();
        assert_eq!(definition.id, "summarise");
        assert_eq!(definition.steps[0].input_fields(), vec!["copy"]);
    }

    #[test]
    fn test_parse_error() {
        let err = WorkflowDefinition::from_toml("id = 3").unwrap_err();
        assert!(matches!(err, EngineError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_built_definition_runs() {
        let backend = Arc::new(MockBackend::echo());
        let shared: Arc<dyn ChatBackend> = backend.clone();
        let workflow = WorkflowDefinition::from_toml(SUMMARISE)
            .unwrap()
            .build(&personas(), |_| shared.clone())
            .unwrap();

        let run = workflow
            .run(
                json!({"copy": "long text"}).as_object().cloned().unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(run.text("summary"), Some("echo: Summarise: long text"));

        let err = workflow
            .run(json!({"copy": ""}).as_object().cloned().unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_guard());
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn test_unknown_persona_rejected() {
        let toml = SUMMARISE.replace("\"editor\"", "\"critic\"");
        let definition = WorkflowDefinition::from_toml(&toml).unwrap();
        let err = definition
            .build(&personas(), |_| Arc::new(MockBackend::new()))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_load_dir_and_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("summarise.toml"))
            .unwrap()
            .write_all(SUMMARISE.as_bytes())
            .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "not = [valid").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let blog_personas = BlogPersonas::with_backend(Arc::new(MockBackend::new()));
        let mut engine = WorkflowEngine::with_builtins(&blog_personas).unwrap();
        let loaded = engine
            .load_dir(dir.path(), &personas(), |_| Arc::new(MockBackend::new()))
            .unwrap();

        assert_eq!(loaded, 1);
        let names: Vec<_> = engine.list_workflows().iter().map(|(n, _, c)| (*n, *c)).collect();
        assert_eq!(names, vec![("multi-agent-workflow", false), ("summarise", true)]);
    }

    #[test]
    fn test_run_unknown_workflow() {
        let engine = WorkflowEngine::new();
        let cancel = CancellationToken::new();
        let err = tokio_test::block_on(engine.run("missing", Fields::new(), &cancel)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
