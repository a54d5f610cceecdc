//! OpenAI-compatible `/chat/completions` adapter (SSE streaming).

use crate::traits::*;
use crate::wire::{check_status, line_stream};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

pub struct OpenAICompatibleEndpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Convert canonical messages to the OpenAI wire shape.
///
/// Canonical tool calls carry no ids, so ids are assigned by position and
/// each tool message takes the next pending id of the preceding assistant
/// message.
pub fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut pending_ids: VecDeque<String> = VecDeque::new();

    messages
        .iter()
        .enumerate()
        .map(|(index, msg)| match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                pending_ids.clear();
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .enumerate()
                    .map(|(position, call)| {
                        let id = format!("call_{}_{}", index, position);
                        pending_ids.push_back(id.clone());
                        json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": arguments_string(&call.arguments),
                            }
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": msg.content,
                    "tool_calls": calls,
                })
            }
            Role::Tool => {
                let id = pending_ids.pop_front().unwrap_or_else(|| {
                    warn!("Tool message at {} has no matching tool call", index);
                    format!("call_{}_orphan", index)
                });
                json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": msg.content,
                })
            }
            role => json!({
                "role": role.as_str(),
                "content": msg.content,
            }),
        })
        .collect()
}

fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(text) => text.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    name: String,
    arguments: String,
}

/// Folds SSE `data:` lines into fragments.
///
/// Tool call deltas arrive split across events and keyed by index; each
/// fragment that touches them carries the cumulative list so far.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    calls: BTreeMap<u64, PartialCall>,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Result<Option<Fragment>, ProviderError> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }
        if data == "[DONE]" {
            return Ok(Some(Fragment::done()));
        }

        let event: Value = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                debug!("Skipping malformed SSE event: {}", e);
                return Ok(None);
            }
        };

        if let Some(error) = event.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::Api(message));
        }

        let Some(choice) = event.get("choices").and_then(|c| c.get(0)) else {
            return Ok(None);
        };
        let delta = choice.get("delta");

        let content_delta = delta
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut touched = false;
        if let Some(deltas) = delta.and_then(|d| d.get("tool_calls")).and_then(Value::as_array) {
            for (position, call_delta) in deltas.iter().enumerate() {
                let index = call_delta
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(position as u64);
                let entry = self.calls.entry(index).or_default();
                if let Some(function) = call_delta.get("function") {
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        entry.name.push_str(name);
                    }
                    if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                        entry.arguments.push_str(arguments);
                    }
                }
                touched = true;
            }
        }

        let tool_calls = if touched { Some(self.calls_so_far()) } else { None };
        let done = choice
            .get("finish_reason")
            .map(|reason| !reason.is_null())
            .unwrap_or(false);

        if content_delta.is_none() && tool_calls.is_none() && !done {
            return Ok(None);
        }

        Ok(Some(Fragment {
            content_delta,
            tool_calls,
            done,
        }))
    }

    fn calls_so_far(&self) -> Vec<ToolCall> {
        self.calls
            .values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCall::new(call.name.clone(), Value::String(call.arguments.clone())))
            .collect()
    }
}

/// Parse a non-streaming completion body into a single fragment.
fn parse_completion(body: &str) -> Result<Fragment, ProviderError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(error) = value.get("error") {
        return Err(ProviderError::Api(error.to_string()));
    }

    let message = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::Parse("Missing choices[0].message".to_string()))?;

    let content_delta = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?;
                    let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
                    Some(ToolCall::new(name, arguments))
                })
                .collect::<Vec<_>>()
        })
        .filter(|calls| !calls.is_empty());

    Ok(Fragment {
        content_delta,
        tool_calls,
        done: true,
    })
}

#[async_trait]
impl ModelEndpoint for OpenAICompatibleEndpoint {
    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model,
            "messages": wire_messages(&request.messages),
            "stream": request.stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
            body["tool_choice"] = json!("auto");
        }

        debug!("openai url={} model={} messages={}", url, request.model, request.messages.len());

        let mut builder = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = check_status(builder.send().await?).await?;

        if !request.stream {
            let text = response.text().await?;
            let fragment = parse_completion(&text)?;
            return Ok(futures_util::stream::iter(vec![Ok(fragment)]).boxed());
        }

        let fragments = line_stream(response)
            .scan(SseAccumulator::new(), |accumulator, line| {
                let item = match line {
                    Ok(line) => accumulator.push_line(&line).transpose(),
                    Err(e) => Some(Err(e)),
                };
                futures_util::future::ready(Some(item))
            })
            .filter_map(futures_util::future::ready);
        Ok(fragments.boxed())
    }

    fn name(&self) -> &str {
        "OpenAI-compatible"
    }
}
