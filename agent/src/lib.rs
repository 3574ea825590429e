//! Persona, tool and memory primitives for local-LLM agent pipelines
//!
//! - [`Persona`] wraps a system prompt and a [`ChatBackend`] handle
//! - [`Capability`] is a schema-validated callable; [`PersonaTask`] backs one with a persona
//! - [`Orchestrator`] delegates to a [`ToolSet`] under a [`Planner`], with optional [`MemoryStore`]

pub mod cancel;
pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod persona;
pub mod planner;
pub mod registry;
pub mod schema;
pub mod tools;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cancel::CancellationToken;
pub use capability::{render_template, Capability, Execute, PersonaTask};
pub use error::{AgentError, Result};
pub use llm::{ChatBackend, OllamaClient};
pub use memory::{InMemoryStore, MemoryStore, SessionKey};
pub use orchestrator::{MemoryFailurePolicy, Orchestrator};
pub use persona::{Generation, Persona};
pub use planner::{BackendPlanner, Planner, SequencePlanner};
pub use registry::{PersonaConfig, PersonaRegistry};
pub use schema::{FieldKind, Fields, Schema};
pub use tools::ToolSet;

#[cfg(feature = "persistence")]
pub use memory::SqliteMemory;
