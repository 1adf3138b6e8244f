pub mod ask_human;
pub mod run_command;
pub mod update_state;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::model::ToolDefinition;
use crate::error::{AppError, Result};
use crate::sandbox::Sandbox;
use crate::state::store::StateStore;

/// Shared handles a tool needs to act on the current run.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub store: Arc<dyn StateStore>,
    pub sandbox: Arc<dyn Sandbox>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<ToolOutput>;
}

#[derive(Debug)]
pub enum ToolOutput {
    /// Normal text result returned to the model.
    Success(String),
    /// Error result returned to the model (the agent can recover).
    Error(String),
    /// Special signal: the run must suspend for human input.
    HumanInputNeeded(String),
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }
}

/// Delay before the single retry granted to rate-limited tool calls.
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Wrapper adding logging, parameter validation and bounded retry around
/// raw tool execution. At most one retry; a short fixed delay for
/// rate-limit errors, immediate otherwise; the second failure propagates.
pub struct ToolInvoker<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> ToolInvoker<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    pub async fn invoke(
        &self,
        ctx: &ToolContext,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<ToolOutput> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| AppError::Tool(format!("Unknown tool: {name}")))?;

        // Parameter-shape validation: the model supplied the input, so a
        // missing or mistyped required field goes back to the model as a
        // tool error rather than being retried or silently accepted.
        if let Err(msg) = validate_input(&tool.definition(), input) {
            tracing::warn!(tool = %name, error = %msg, "Tool input rejected");
            return Ok(ToolOutput::Error(msg));
        }

        tracing::info!(tool = %name, run_id = %ctx.run_id, "Tool call start");

        match tool.execute(ctx, input.clone()).await {
            Ok(output) => {
                tracing::debug!(tool = %name, "Tool call succeeded");
                Ok(output)
            }
            Err(first) => {
                if first.is_rate_limited() {
                    tracing::warn!(tool = %name, error = %first, "Tool rate limited, retrying after delay");
                    tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
                } else {
                    tracing::warn!(tool = %name, error = %first, "Tool failed, retrying once");
                }

                match tool.execute(ctx, input.clone()).await {
                    Ok(output) => {
                        tracing::debug!(tool = %name, "Tool retry succeeded");
                        Ok(output)
                    }
                    Err(second) => {
                        tracing::error!(tool = %name, error = %second, "Tool failed after retry");
                        Err(second)
                    }
                }
            }
        }
    }
}

/// Check the model-supplied input object against the tool's declared
/// schema: required fields present, declared properties type-consistent.
fn validate_input(
    definition: &ToolDefinition,
    input: &serde_json::Value,
) -> std::result::Result<(), String> {
    let Some(obj) = input.as_object() else {
        return Err("Tool input must be a JSON object".to_string());
    };

    let schema = &definition.input_schema;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(field) {
                return Err(format!("Missing required parameter: {field}"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in obj {
            let Some(declared) = properties.get(key) else {
                continue;
            };
            let expected = declared.get("type").and_then(|t| t.as_str());
            let matches = match expected {
                Some("string") => value.is_string(),
                Some("array") => value.is_array(),
                Some("object") => value.is_object(),
                Some("integer") | Some("number") => value.is_number(),
                Some("boolean") => value.is_boolean(),
                _ => true,
            };
            if !matches {
                return Err(format!(
                    "Parameter '{key}' has wrong type, expected {}",
                    expected.unwrap_or("unknown")
                ));
            }
        }
    }

    Ok(())
}
