//! Configuration loading (.quill.toml)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::llm::{OllamaClient, DEFAULT_OLLAMA_URL, DEFAULT_TIMEOUT_SECS};
use crate::orchestrator::{MemoryFailurePolicy, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_ITERATIONS};
use crate::registry::PersonaConfig;

/// Config file name searched for by [`QuillConfig::load`]
pub const CONFIG_FILE: &str = ".quill.toml";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/quill/
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("quill").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub workflows: WorkflowsConfig,
    /// Extra or overriding persona definitions
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

/// LLM configuration section
#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Memory configuration section
#[derive(Debug, Deserialize)]
pub struct MemoryConfig {
    /// Database path (default ~/.quill/memory.db)
    pub path: Option<PathBuf>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub on_failure: MemoryFailurePolicy,
}

/// Orchestrator configuration section
#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

/// Custom workflow configuration section
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowsConfig {
    /// Directory of `*.toml` workflow definitions
    pub dir: Option<PathBuf>,
}

fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Ollama client for `model`, or the configured default model
    pub fn client(&self, model: Option<&str>) -> OllamaClient {
        OllamaClient::new(&self.url, model.unwrap_or(&self.model))
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            history_limit: default_history_limit(),
            on_failure: MemoryFailurePolicy::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl QuillConfig {
    /// Load config from .quill.toml
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .quill.toml
    /// 2. Check ~/.config/quill/.quill.toml (global fallback)
    /// 3. Fall back to defaults
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file(CONFIG_FILE) {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No {} found, using defaults", CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load from a specific path
    ///
    /// A relative `[workflows] dir` is resolved against the config file's directory.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if let (Some(dir), Some(base)) = (config.workflows.dir.as_ref(), path.parent()) {
            if dir.is_relative() {
                config.workflows.dir = Some(base.join(dir));
            }
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the default model (for use elsewhere)
    pub fn default_model() -> String {
        default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = QuillConfig::from_toml("").unwrap();

        assert_eq!(config.llm.url, "http://localhost:11434");
        assert_eq!(config.llm.model, "llama3.2");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.memory.history_limit, 20);
        assert_eq!(config.memory.on_failure, MemoryFailurePolicy::Warn);
        assert_eq!(config.orchestrator.max_iterations, 10);
        assert!(config.personas.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = QuillConfig::from_toml(
            r#"
            [llm]
            url = "http://gpu-box:11434"
            model = "qwen3:14b"

            [memory]
            path = "/tmp/quill.db"
            history_limit = 5
            on_failure = "fail"

            [orchestrator]
            max_iterations = 4

            [[personas]]
            name = "editor"
            instructions = "You are a strict editor."
            model = "llama3.1:70b"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "qwen3:14b");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.memory.path, Some(PathBuf::from("/tmp/quill.db")));
        assert_eq!(config.memory.on_failure, MemoryFailurePolicy::Fail);
        assert_eq!(config.orchestrator.max_iterations, 4);
        assert_eq!(config.personas[0].model.as_deref(), Some("llama3.1:70b"));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert!(QuillConfig::from_toml("[memory]\non_failure = \"ignore\"").is_err());
    }

    #[test]
    fn test_relative_workflow_dir_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[workflows]\ndir = \"workflows\"").unwrap();

        let config = QuillConfig::load_from_path(&path).unwrap();
        assert_eq!(config.workflows.dir, Some(dir.path().join("workflows")));
    }

    #[test]
    fn test_client_model_override() {
        let llm = LlmConfig::default();
        assert_eq!(crate::llm::ChatBackend::model(&llm.client(None)), "llama3.2");
        assert_eq!(crate::llm::ChatBackend::model(&llm.client(Some("qwen3:14b"))), "qwen3:14b");
    }
}
