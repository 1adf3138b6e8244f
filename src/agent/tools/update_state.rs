use async_trait::async_trait;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{Tool, ToolContext, ToolOutput};
use crate::error::{AppError, Result};
use crate::state::store::StateStore;
use crate::state::{RunStatus, StatePatch};

/// Persists an agent's artifact and the resulting status. Every producer
/// agent must finish its turn with a successful call to this tool.
pub struct UpdateStateTool;

#[async_trait]
impl Tool for UpdateStateTool {
    fn name(&self) -> &str {
        "update_state"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_state".to_string(),
            description: "Persist your finished artifact and move the workflow to its next status. Call this exactly once, as the final step of your turn. Provide only the artifact field you produced.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "description": "Next workflow status, e.g. NEEDS_REQUIREMENTS_CRITIQUE"
                    },
                    "requirements": {
                        "type": "string",
                        "description": "The requirements document, if you are the requirements analyst"
                    },
                    "test_code": {
                        "type": "string",
                        "description": "The full test file, if you are the test author"
                    },
                    "implementation_code": {
                        "type": "string",
                        "description": "The full implementation file, if you are the implementer"
                    }
                },
                "required": ["status"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        let status_str = input["status"].as_str().unwrap_or_default();
        let Some(status) = RunStatus::parse(status_str) else {
            return Ok(ToolOutput::Error(format!(
                "Unknown status: {status_str:?}"
            )));
        };

        let patch = StatePatch {
            status: Some(status),
            requirements: input["requirements"].as_str().map(str::to_string),
            test_code: input["test_code"].as_str().map(str::to_string),
            implementation_code: input["implementation_code"].as_str().map(str::to_string),
            critique_text: None,
        };

        let mut state = ctx
            .store
            .get(&ctx.run_id)
            .await?
            .ok_or_else(|| AppError::RunNotFound(ctx.run_id.clone()))?;

        state.apply_patch(patch);
        ctx.store.set(&ctx.run_id, &state).await?;

        tracing::info!(run_id = %ctx.run_id, status = %status, "State updated by agent");

        Ok(ToolOutput::Success(format!(
            "State updated, status is now {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::test_support::StubSandbox;
    use crate::state::store::{MemoryStore, StateStore};
    use crate::state::WorkflowState;
    use std::sync::Arc;

    fn ctx_with_state() -> ToolContext {
        let store = Arc::new(MemoryStore::new());
        ToolContext {
            run_id: "run-1".to_string(),
            store,
            sandbox: Arc::new(StubSandbox::succeeding("")),
        }
    }

    #[tokio::test]
    async fn test_persists_artifact_and_status() {
        let ctx = ctx_with_state();
        ctx.store
            .set("run-1", &WorkflowState::new("run-1", "task"))
            .await
            .unwrap();

        let out = UpdateStateTool
            .execute(
                &ctx,
                json!({
                    "status": "NEEDS_REQUIREMENTS_CRITIQUE",
                    "requirements": "1. add(a, b) returns a + b"
                }),
            )
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Success(_)));

        let state = ctx.store.get("run-1").await.unwrap().unwrap();
        assert_eq!(state.status, RunStatus::NeedsRequirementsCritique);
        assert_eq!(
            state.requirements.as_deref(),
            Some("1. add(a, b) returns a + b")
        );
    }

    #[tokio::test]
    async fn test_unknown_status_is_recoverable_tool_error() {
        let ctx = ctx_with_state();
        ctx.store
            .set("run-1", &WorkflowState::new("run-1", "task"))
            .await
            .unwrap();

        let out = UpdateStateTool
            .execute(&ctx, json!({"status": "NEEDS_COFFEE"}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Error(_)));

        // State untouched
        let state = ctx.store.get("run-1").await.unwrap().unwrap();
        assert_eq!(state.status, RunStatus::NeedsRequirements);
    }

    #[tokio::test]
    async fn test_missing_run_is_a_hard_error() {
        let ctx = ctx_with_state();
        let err = UpdateStateTool
            .execute(&ctx, json!({"status": "NEEDS_TEST"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("run-1"));
    }
}
