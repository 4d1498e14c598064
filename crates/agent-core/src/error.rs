//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Network failure talking to a backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status or an error payload
    #[error("Provider error: {0}")]
    Provider(String),

    /// Credential is invalid or could not be refreshed; the user must log in again
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Run was cancelled (user abort, signal, or dropped presentation layer)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Skill lookup or manifest error
    #[error("Skill error: {0}")]
    Skill(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether the error came from cancelling the run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Transport(msg) => format!("The AI service could not be reached: {}", msg),
            AgentError::Provider(msg) => format!("The AI service encountered an error: {}", msg),
            AgentError::Auth(msg) => format!(
                "Authentication failed: {}. Please log in again.",
                msg.trim_end_matches(", please login again")
            ),
            AgentError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolExecution(msg) => format!("Tool error: {}", msg),
            AgentError::Cancelled(_) => "The run was stopped.".into(),
            AgentError::Skill(msg) => format!("Skill error: {}", msg),
            AgentError::Config(msg) => format!("Configuration problem: {}", msg),
            AgentError::Io(e) => format!("File error: {}", e),
            AgentError::Json(e) => format!("Invalid JSON: {}", e),
        }
    }
}
