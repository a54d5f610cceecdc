use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Every way a tool call can fail.
///
/// Apart from `DuplicateTool`, which is a registration error, these are
/// contained by the session driver: the text is shown to the model as the
/// tool's output.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Could not parse arguments for {tool}: {reason}")]
    ArgumentParse { tool: String, reason: String },

    #[error("Invalid arguments for {tool}: {reason}")]
    Validation {
        tool: String,
        reason: String,
        missing: Vec<String>,
    },

    #[error("Tool {tool} failed: {cause}")]
    Execution { tool: String, cause: String },

    #[error("Tool {tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
}

impl ToolError {
    pub fn execution(tool: &str, cause: impl ToString) -> Self {
        ToolError::Execution {
            tool: tool.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn validation(tool: &str, reason: impl ToString) -> Self {
        ToolError::Validation {
            tool: tool.to_string(),
            reason: reason.to_string(),
            missing: Vec::new(),
        }
    }
}

/// A locally executable capability offered to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON-Schema object describing the arguments.
    fn schema(&self) -> Value;

    /// Checks beyond the schema, run before `execute`.
    fn validate(&self, _args: &Map<String, Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String, ToolError>;
}
