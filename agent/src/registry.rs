//! Persona configuration and registry
//!
//! Named persona definitions with optional per-persona model selection.
//! Configured personas are turned into [`Persona`] handles by binding them
//! to a backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::llm::ChatBackend;
use crate::persona::Persona;

/// Configuration for a persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Registry key (e.g. "copywriter")
    pub name: String,

    /// Name the persona goes by in logs and prompts
    #[serde(default)]
    pub display_name: String,

    /// System instructions
    pub instructions: String,

    /// Model override; `None` uses the configured default
    #[serde(default)]
    pub model: Option<String>,
}

impl PersonaConfig {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            instructions: instructions.into(),
            model: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Display name, falling back to the registry key
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// Registry of available personas
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, PersonaConfig>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persona, replacing any with the same name
    pub fn register(&mut self, config: PersonaConfig) {
        self.personas.insert(config.name.clone(), config);
    }

    pub fn with_persona(mut self, config: PersonaConfig) -> Self {
        self.register(config);
        self
    }

    /// Register every config, overriding existing entries
    pub fn extend(&mut self, configs: impl IntoIterator<Item = PersonaConfig>) {
        for config in configs {
            self.register(config);
        }
    }

    pub fn get(&self, name: &str) -> Option<&PersonaConfig> {
        self.personas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.personas.contains_key(name)
    }

    /// Persona names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PersonaConfig)> {
        self.personas.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Build a persona by name
    ///
    /// `backend_for` receives the persona's model override (if any) and
    /// returns the backend the persona should talk to.
    pub fn build<F>(&self, name: &str, backend_for: F) -> Result<Persona>
    where
        F: FnOnce(Option<&str>) -> Arc<dyn ChatBackend>,
    {
        let config = self
            .get(name)
            .ok_or_else(|| AgentError::Config(format!("unknown persona '{}'", name)))?;

        Ok(Persona::new(
            config.label(),
            config.instructions.clone(),
            backend_for(config.model.as_deref()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn registry() -> PersonaRegistry {
        PersonaRegistry::new()
            .with_persona(
                PersonaConfig::new("copywriter", "You write copy.").with_display_name("Copywriter"),
            )
            .with_persona(PersonaConfig::new("editor", "You edit copy.").with_model("qwen3:14b"))
    }

    #[test]
    fn test_config_from_toml() {
        let config: PersonaConfig = toml::from_str(
            r#"
            name = "summariser"
            instructions = "You summarise text."
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "summariser");
        assert_eq!(config.label(), "summariser");
        assert!(config.model.is_none());
    }

    #[test]
    fn test_names_sorted_and_override() {
        let mut registry = registry();
        registry.extend([PersonaConfig::new("copywriter", "You write punchy copy.")]);

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["copywriter", "editor"]);
        assert_eq!(registry.get("copywriter").unwrap().instructions, "You write punchy copy.");
    }

    #[test]
    fn test_build_passes_model_override() {
        let registry = registry();
        let mut seen = None;

        let persona = registry
            .build("editor", |model| {
                seen = model.map(str::to_string);
                Arc::new(MockBackend::new())
            })
            .unwrap();

        assert_eq!(persona.name(), "editor");
        assert_eq!(persona.instructions(), "You edit copy.");
        assert_eq!(seen.as_deref(), Some("qwen3:14b"));
    }

    #[test]
    fn test_build_unknown_persona() {
        let err = registry()
            .build("publisher", |_| Arc::new(MockBackend::new()))
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
