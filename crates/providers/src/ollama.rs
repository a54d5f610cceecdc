//! Ollama `/api/chat` adapter.
//!
//! Streaming replies arrive as newline-delimited JSON objects of the form
//! `{"message": {"content": "...", "tool_calls": [...]}, "done": false}`.

use crate::traits::*;
use crate::wire::{check_status, line_stream};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaEndpoint {
    client: Client,
    base_url: String,
}

impl OllamaEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for OllamaEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Convert canonical messages to Ollama's wire shape.
///
/// Ollama expects tool call arguments as objects, so raw argument strings
/// are parsed here; unparseable ones are sent as `{}`.
pub fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let mut value = json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            });
            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "function": {
                                "name": call.name,
                                "arguments": arguments_object(&call.arguments),
                            }
                        })
                    })
                    .collect();
                value["tool_calls"] = json!(calls);
            }
            value
        })
        .collect()
}

fn arguments_object(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => json!({}),
        },
        _ => json!({}),
    }
}

/// Parse one NDJSON line into a fragment.
///
/// Blank and non-JSON lines yield `Ok(None)` and are skipped; an `error`
/// field reported by the server is an error.
pub fn parse_chunk(line: &str) -> Result<Option<Fragment>, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: Value = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping malformed stream line: {}", e);
            return Ok(None);
        }
    };

    if let Some(error) = chunk.get("error").and_then(Value::as_str) {
        return Err(ProviderError::Api(error.to_string()));
    }

    let message = chunk.get("message");
    let content_delta = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
                    Some(ToolCall { name, arguments })
                })
                .collect::<Vec<_>>()
        })
        .filter(|calls| !calls.is_empty());

    let done = chunk.get("done").and_then(Value::as_bool).unwrap_or(false);

    Ok(Some(Fragment {
        content_delta,
        tool_calls,
        done,
    }))
}

#[async_trait]
impl ModelEndpoint for OllamaEndpoint {
    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut body = json!({
            "model": request.model,
            "messages": wire_messages(&request.messages),
            "stream": request.stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        debug!("ollama url={} model={} messages={}", url, request.model, request.messages.len());

        let response = self.client.post(&url).json(&body).send().await?;
        let response = check_status(response).await?;

        if !request.stream {
            let text = response.text().await?;
            let fragment = parse_chunk(&text)?
                .ok_or_else(|| ProviderError::Parse("Empty or malformed response body".to_string()))?;
            return Ok(futures_util::stream::iter(vec![Ok(fragment.finished())]).boxed());
        }

        let fragments = line_stream(response).filter_map(|line| async move {
            match line {
                Ok(line) => parse_chunk(&line).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(fragments.boxed())
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}
