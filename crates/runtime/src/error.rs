//! Runtime errors.

use secretary_providers::ProviderError;
use thiserror::Error;

/// Failures that abort a turn or a session setup step.
///
/// Tool failures never appear here: they are contained inside the turn and
/// shown to the model as tool output.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] ProviderError),

    #[error("Endpoint timed out after {timeout_ms}ms")]
    EndpointTimeout { timeout_ms: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Tool setup error: {0}")]
    ToolSetup(#[from] secretary_tools::ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Errors from the model endpoint itself; the caller may retry the turn.
    pub fn is_endpoint(&self) -> bool {
        matches!(self, RuntimeError::Endpoint(_) | RuntimeError::EndpointTimeout { .. })
    }
}
