use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether re-sending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ProviderError::Http(format!("Network connection failed: {}", e))
        } else {
            ProviderError::Http(e.to_string())
        }
    }
}

/// Message role in conversation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is either a JSON object or a string holding one, exactly as
/// the provider delivered it; the tool registry normalizes both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Assistant message that requested at least one tool.
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// One incremental unit of a streamed model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub content_delta: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub done: bool,
}

impl Fragment {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            content_delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Outbound chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Tool schemas in the function-calling envelope.
    pub tools: Vec<serde_json::Value>,
    pub stream: bool,
}

/// Lazy, finite, single-use sequence of reply fragments.
pub type FragmentStream = BoxStream<'static, Result<Fragment, ProviderError>>;

/// A remote chat-completion model.
///
/// Implementations normalize their provider's wire format into
/// [`Fragment`]s; nothing past this boundary sees provider-specific shapes.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Open a reply stream for `request`.
    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError>;

    fn name(&self) -> &str;
}
