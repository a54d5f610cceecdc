use crate::arithmetic::{self, ArithmeticError};
use crate::traits::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type Clock = Arc<dyn Fn() -> String + Send + Sync>;

pub struct GetTimeTool {
    clock: Clock,
}

impl GetTimeTool {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(|| chrono::Local::now().format(TIME_FORMAT).to_string()),
        }
    }

    /// Fixed or scripted clock, for deterministic sessions.
    pub fn with_clock(clock: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }
}

impl Default for GetTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GetTimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Get the current local system time"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<String, ToolError> {
        Ok((self.clock)())
    }
}

pub struct CalculateTool;

impl CalculateTool {
    fn expression<'a>(&self, args: &'a Map<String, Value>) -> Result<&'a str, ToolError> {
        args.get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::validation(self.name(), "Missing 'expression' field"))
    }
}

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression using + - * / and parentheses"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression, e.g. 2+2, (3*5)/2"
                }
            },
            "required": ["expression"]
        })
    }

    // Syntax is checked here so rejected input never reaches `execute`.
    fn validate(&self, args: &Map<String, Value>) -> Result<(), ToolError> {
        let expression = self.expression(args)?;
        arithmetic::parse(expression)
            .map(|_| ())
            .map_err(|e| ToolError::validation(self.name(), e))
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let expression = self.expression(&args)?;
        let value = arithmetic::evaluate(expression).map_err(|e| match e {
            ArithmeticError::DivisionByZero => ToolError::execution(self.name(), e),
            other => ToolError::validation(self.name(), other),
        })?;
        Ok(format!("{} = {}", expression.trim(), arithmetic::format_number(value)))
    }
}
