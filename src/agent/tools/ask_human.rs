use async_trait::async_trait;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{Tool, ToolContext, ToolOutput};
use crate::error::Result;

/// Suspends the run for human input. The question is persisted and the
/// controller parks the run until a signal arrives or the wait times out.
pub struct AskHumanTool;

#[async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "ask_human".to_string(),
            description: "Ask the task author for clarification. Use this when the task is ambiguous or impossible to act on as written. This suspends the run until a human answers.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The clarification question to ask"
                    }
                },
                "required": ["question"]
            }),
        }
    }

    async fn execute(&self, _ctx: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        let question = match input["question"].as_str() {
            Some(q) => q,
            None => return Ok(ToolOutput::Error("Missing 'question' parameter".to_string())),
        };

        Ok(ToolOutput::HumanInputNeeded(question.to_string()))
    }
}
