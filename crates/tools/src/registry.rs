use crate::traits::{Tool, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Exported description of one tool, as sent to the model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    fn from_tool(tool: &dyn Tool) -> Self {
        let mut parameters = tool.schema();
        if !parameters.is_object() {
            parameters = json!({});
        }
        if let Some(object) = parameters.as_object_mut() {
            object.insert("type".to_string(), json!("object"));
            object.entry("properties").or_insert_with(|| json!({}));
        }

        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters,
        }
    }

    /// OpenAI/Ollama function-calling envelope.
    pub fn to_function_value(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }

    fn required(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Name-keyed tool table.
///
/// Built once with `register`, then shared read-only (usually behind an
/// `Arc`) by every session in the process.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self, ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        debug!("Registering tool: {}", name);
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full schema list, in registration order.
    pub fn describe(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSchema::from_tool(tool.as_ref()))
            .collect()
    }

    /// Schemas wrapped in the function-calling envelope.
    pub fn schemas(&self) -> Vec<Value> {
        self.describe().iter().map(ToolSchema::to_function_value).collect()
    }

    /// Invoke with the registry's default timeout.
    pub async fn invoke(&self, name: &str, raw_arguments: &Value) -> Result<String, ToolError> {
        self.invoke_with_timeout(name, raw_arguments, self.timeout).await
    }

    /// Look up, parse, validate and run a tool call.
    ///
    /// `raw_arguments` may be a JSON object or a string holding one. Panics
    /// inside the tool body are caught and reported as `Execution`. On
    /// timeout `Timeout` is returned, but only after the tool task has run to
    /// completion: a tool is never interrupted mid-side-effect and the next
    /// call never overlaps it.
    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        raw_arguments: &Value,
        limit: Duration,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args = parse_arguments(name, raw_arguments)?;
        validate_arguments(&ToolSchema::from_tool(tool.as_ref()), &args)?;
        tool.validate(&args)?;

        info!("Executing tool: {}", name);
        let mut handle = tokio::spawn(async move { tool.execute(args).await });

        match timeout(limit, &mut handle).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    warn!("Tool {} returned error: {}", name, e);
                }
                result
            }
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    error!("Tool {} panicked", name);
                    Err(ToolError::execution(name, "tool panicked"))
                } else {
                    error!("Tool {} was cancelled", name);
                    Err(ToolError::execution(name, "tool task cancelled"))
                }
            }
            Err(_) => {
                let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    "Tool {} timed out after {}ms, waiting for it to finish",
                    name, timeout_ms
                );
                if let Err(join_err) = handle.await {
                    error!("Tool {} failed after timing out: {}", name, join_err);
                }
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize raw arguments into a keyword map.
///
/// Accepts an object, a string containing a JSON object, an empty string
/// or `null` (both meaning "no arguments").
pub fn parse_arguments(tool: &str, raw: &Value) -> Result<Map<String, Value>, ToolError> {
    let parse_error = |reason: String| ToolError::ArgumentParse {
        tool: tool.to_string(),
        reason,
    };

    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(Value::Null) => Ok(Map::new()),
            Ok(other) => Err(parse_error(format!("expected a JSON object, got {}", type_name(&other)))),
            Err(e) => Err(parse_error(e.to_string())),
        },
        other => Err(parse_error(format!("expected a JSON object, got {}", type_name(other)))),
    }
}

fn validate_arguments(schema: &ToolSchema, args: &Map<String, Value>) -> Result<(), ToolError> {
    let missing: Vec<String> = schema
        .required()
        .into_iter()
        .filter(|key| args.get(*key).map_or(true, Value::is_null))
        .map(str::to_string)
        .collect();

    if !missing.is_empty() {
        return Err(ToolError::Validation {
            tool: schema.name.clone(),
            reason: format!("missing required parameters: {}", missing.join(", ")),
            missing,
        });
    }

    let properties = schema.parameters.get("properties").and_then(Value::as_object);
    for (key, value) in args {
        let expected = properties
            .and_then(|p| p.get(key))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str);
        if let Some(expected) = expected {
            if !matches_type(value, expected) {
                return Err(ToolError::validation(
                    &schema.name,
                    format!("parameter '{}' must be of type {}, got {}", key, expected, type_name(value)),
                ));
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
