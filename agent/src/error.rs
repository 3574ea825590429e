//! Error taxonomy shared by personas, tools, planners and memory stores

/// Result alias used across the runtime
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Errors raised while invoking personas, tools or memory
///
/// None of these are retried internally; they propagate unmodified to the
/// caller of `generate`, `invoke` or `run`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// A payload failed a structural schema check
    #[error("validation failed for {target}: {reason}")]
    Validation { target: String, reason: String },

    /// The model backend was unreachable, errored, timed out or replied with garbage
    #[error("backend error: {0}")]
    Backend(String),

    /// An explicit precondition of a step or tool did not hold
    #[error("{0}")]
    Guard(String),

    /// The memory store could not load or append history
    #[error("memory store error: {0}")]
    Memory(String),

    /// The planner asked for a tool that is not configured
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The orchestrator loop ran out of iterations
    #[error("orchestrator reached maximum iterations ({0}) without a final answer")]
    IterationLimit(usize),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid runtime configuration (unknown persona, malformed definition)
    #[error("configuration error: {0}")]
    Config(String),
}

impl AgentError {
    pub fn validation(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self::Backend(message.to_string())
    }

    pub fn guard(message: impl Into<String>) -> Self {
        Self::Guard(message.into())
    }

    pub fn memory(message: impl std::fmt::Display) -> Self {
        Self::Memory(message.to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Guard(_))
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Backend(format!("request timed out: {}", e))
        } else {
            Self::Backend(e.to_string())
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Memory(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err =
            AgentError::validation("copywriter-agent input", "missing required field 'topic'");
        assert_eq!(
            err.to_string(),
            "validation failed for copywriter-agent input: missing required field 'topic'"
        );

        let err = AgentError::guard("Copy not found in trigger data");
        assert_eq!(err.to_string(), "Copy not found in trigger data");
        assert!(err.is_guard());
        assert!(!err.is_validation());
    }
}
