//! Error types for the orchestrator

use thiserror::Error;

/// Errors that can occur in the orchestration and communication layer
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed envelope or failed schema check
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tool server returned a failure or the call itself errored
    #[error("Tool call error: {0}")]
    ToolCall(String),

    /// Circuit breaker is open for this tool server
    #[error("Circuit open for tool server '{0}'")]
    CircuitOpen(String),

    /// In-flight call exceeded its timeout
    #[error("Tool call timed out after {0}s")]
    Timeout(u64),

    /// Transport read/write failure on a client connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Bad or unreachable tool-server definition
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool server is not started or not known
    #[error("Tool server not found: {0}")]
    ServerNotFound(String),

    /// Failed to spawn a tool-server subprocess
    #[error("Failed to spawn tool server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// Session lookup failed
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Internal(format!("IO error: {}", err))
    }
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
