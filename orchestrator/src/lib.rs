//! Step pipelines and named workflows over quill-agent personas
//!
//! This crate provides:
//! - [`Workflow`]: a fixed linear chain of schema-checked steps
//! - [`WorkflowEngine`]: named built-in and TOML-defined workflows
//! - the blog-post configuration (`multi-agent-workflow` and the publisher agent)
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestrator::blog::{self, BlogPersonas};
//!
//! let backend = Arc::new(OllamaClient::new(DEFAULT_OLLAMA_URL, "llama3.2"));
//! let personas = BlogPersonas::with_backend(backend);
//! let workflow = blog::multi_agent_workflow(&personas)?;
//!
//! let run = workflow.run(input, &CancellationToken::new()).await?;
//! println!("{}", run.text("finalCopy").unwrap_or_default());
//! ```

pub mod blog;
pub mod engine;
pub mod prompts;
pub mod workflow;

pub use blog::BlogPersonas;
pub use engine::{EngineError, WorkflowDefinition, WorkflowEngine};
pub use workflow::{Step, StepResult, Workflow, WorkflowError, WorkflowRun, WorkflowStatus};
