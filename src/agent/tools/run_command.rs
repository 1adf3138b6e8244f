use async_trait::async_trait;
use serde_json::json;

use crate::agent::model::ToolDefinition;
use crate::agent::tools::{Tool, ToolContext, ToolOutput};
use crate::error::{AppError, Result};
use crate::sandbox::{Sandbox, IMPLEMENTATION_FILE, TEST_FILE};
use crate::state::store::StateStore;

const MAX_OUTPUT_BYTES: usize = 32 * 1024;

/// Runs a command in the run's sandbox session, creating the session and
/// materializing the current artifacts on first use.
pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_command".to_string(),
            description: format!(
                "Run a command inside the sandbox working directory. The current test file is at {TEST_FILE} and the implementation at {IMPLEMENTATION_FILE}. Returns stdout, stderr and the exit code."
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Command and arguments, e.g. [\"python3\", \"-m\", \"pytest\", \"-q\"]"
                    }
                },
                "required": ["args"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        let args: Vec<String> = match input["args"].as_array() {
            Some(values) => values
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .unwrap_or_default(),
            None => Vec::new(),
        };
        if args.is_empty() {
            return Ok(ToolOutput::Error(
                "'args' must be a non-empty array of strings".to_string(),
            ));
        }

        let mut state = ctx
            .store
            .get(&ctx.run_id)
            .await?
            .ok_or_else(|| AppError::RunNotFound(ctx.run_id.clone()))?;

        let sandbox_ref = match &state.sandbox_ref {
            Some(r) => r.clone(),
            None => {
                let r = ctx.sandbox.create_session().await?;
                state.sandbox_ref = Some(r.clone());
                ctx.store.set(&ctx.run_id, &state).await?;
                r
            }
        };

        // Sync the artifacts the command is going to exercise
        if let Some(test_code) = &state.test_code {
            ctx.sandbox.write_file(&sandbox_ref, TEST_FILE, test_code).await?;
        }
        if let Some(implementation) = &state.implementation_code {
            ctx.sandbox
                .write_file(&sandbox_ref, IMPLEMENTATION_FILE, implementation)
                .await?;
        }

        let output = ctx.sandbox.exec(&sandbox_ref, &args).await?;

        let mut text = format!(
            "exit code: {}\n\nstdout:\n{}\n\nstderr:\n{}",
            output.exit_code, output.stdout, output.stderr
        );
        if text.len() > MAX_OUTPUT_BYTES {
            let mut cut = MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n... (output truncated)");
        }

        if output.success() {
            Ok(ToolOutput::Success(text))
        } else {
            Ok(ToolOutput::Error(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::test_support::StubSandbox;
    use crate::state::store::{MemoryStore, StateStore};
    use crate::state::WorkflowState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_creates_session_on_first_use() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("run-1", &WorkflowState::new("run-1", "task"))
            .await
            .unwrap();
        let ctx = ToolContext {
            run_id: "run-1".to_string(),
            store: store.clone(),
            sandbox: Arc::new(StubSandbox::succeeding("all green")),
        };

        let out = RunCommandTool
            .execute(&ctx, json!({"args": ["pytest"]}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Success(_)));

        let state = store.get("run-1").await.unwrap().unwrap();
        assert_eq!(state.sandbox_ref.as_deref(), Some("stub-session"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_recoverable_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("run-1", &WorkflowState::new("run-1", "task"))
            .await
            .unwrap();
        let ctx = ToolContext {
            run_id: "run-1".to_string(),
            store,
            sandbox: Arc::new(StubSandbox::failing("assertion failed")),
        };

        let out = RunCommandTool
            .execute(&ctx, json!({"args": ["pytest"]}))
            .await
            .unwrap();
        match out {
            ToolOutput::Error(text) => assert!(text.contains("assertion failed")),
            _ => panic!("expected tool error"),
        }
    }

    #[tokio::test]
    async fn test_empty_args_rejected() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("run-1", &WorkflowState::new("run-1", "task"))
            .await
            .unwrap();
        let ctx = ToolContext {
            run_id: "run-1".to_string(),
            store,
            sandbox: Arc::new(StubSandbox::succeeding("")),
        };

        let out = RunCommandTool
            .execute(&ctx, json!({"args": []}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Error(_)));
    }
}
