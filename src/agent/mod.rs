pub mod model;
pub mod prompt;
pub mod tools;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::model::{
    CompletionRequest, ContentBlock, Message, MessageContent, ModelClient,
};
use crate::agent::tools::{
    ask_human::AskHumanTool, run_command::RunCommandTool, update_state::UpdateStateTool, Tool,
    ToolContext, ToolInvoker, ToolOutput, ToolRegistry,
};
use crate::error::{AppError, Result};
use crate::state::WorkflowState;

/// The four agent capabilities. Variants differ only in prompt content
/// and tool surface; the calling contract is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Requirements,
    TestAuthor,
    Implementer,
    Reviewer,
}

impl AgentRole {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Requirements => "requirements_analyst",
            AgentRole::TestAuthor => "test_author",
            AgentRole::Implementer => "implementer",
            AgentRole::Reviewer => "reviewer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one agent turn.
#[derive(Debug)]
pub struct AgentTurn {
    /// Final text output (the reviewer's whole verdict lives here).
    pub text: String,
    /// Whether the turn persisted a state update through `update_state`.
    pub updated_state: bool,
    /// Set when the agent asked to suspend for human input.
    pub human_input_request: Option<String>,
}

/// One agent capability. The controller depends only on this trait, so
/// scripted implementations can drive it in tests.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Run one full turn against the current state.
    async fn act(&self, state: &WorkflowState, ctx: &ToolContext) -> Result<AgentTurn>;
}

/// The production agent: a model-backed tool-use conversation loop.
pub struct ModelAgent {
    role: AgentRole,
    client: Arc<ModelClient>,
    tools: ToolRegistry,
    max_turns: u32,
}

impl ModelAgent {
    pub fn new(role: AgentRole, client: Arc<ModelClient>, tools: ToolRegistry, max_turns: u32) -> Self {
        Self {
            role,
            client,
            tools,
            max_turns,
        }
    }
}

#[async_trait]
impl Agent for ModelAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn act(&self, state: &WorkflowState, ctx: &ToolContext) -> Result<AgentTurn> {
        let system = prompt::system_prompt(self.role, state);
        let tool_definitions = self.tools.definitions();
        let invoker = ToolInvoker::new(&self.tools);

        let mut messages = vec![Message {
            role: "user".to_string(),
            content: MessageContent::Text(prompt::initial_message(self.role)),
        }];

        let mut updated_state = false;

        for turn in 0..self.max_turns {
            tracing::info!(role = %self.role, run_id = %ctx.run_id, turn = turn, "Agent turn");

            let request = CompletionRequest {
                model: self.client.model().to_string(),
                max_tokens: self.client.max_tokens(),
                system: system.clone(),
                messages: messages.clone(),
                tools: tool_definitions.clone(),
            };

            let response = self.client.complete(&request).await?;

            tracing::debug!(
                role = %self.role,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                stop_reason = ?response.stop_reason,
                "Model response"
            );

            let stop_reason = response.stop_reason.as_deref().unwrap_or("unknown");

            match stop_reason {
                "end_turn" => {
                    return Ok(AgentTurn {
                        text: model::extract_text(&response.content),
                        updated_state,
                        human_input_request: None,
                    });
                }
                "tool_use" => {
                    messages.push(Message {
                        role: "assistant".to_string(),
                        content: MessageContent::Blocks(response.content.clone()),
                    });

                    let mut tool_results = Vec::new();

                    for block in &response.content {
                        if let ContentBlock::ToolUse { id, name, input } = block {
                            match invoker.invoke(ctx, name, input).await? {
                                ToolOutput::Success(content) => {
                                    if name == "update_state" {
                                        updated_state = true;
                                    }
                                    tool_results.push(ContentBlock::ToolResult {
                                        tool_use_id: id.clone(),
                                        content,
                                        is_error: None,
                                    });
                                }
                                ToolOutput::Error(error) => {
                                    tracing::warn!(tool = %name, error = %error, "Tool returned error to model");
                                    tool_results.push(ContentBlock::ToolResult {
                                        tool_use_id: id.clone(),
                                        content: error,
                                        is_error: Some(true),
                                    });
                                }
                                ToolOutput::HumanInputNeeded(question) => {
                                    tracing::info!(role = %self.role, "Agent requested human input");
                                    return Ok(AgentTurn {
                                        text: question.clone(),
                                        updated_state,
                                        human_input_request: Some(question),
                                    });
                                }
                            }
                        }
                    }

                    messages.push(Message {
                        role: "user".to_string(),
                        content: MessageContent::Blocks(tool_results),
                    });
                }
                "max_tokens" => {
                    tracing::warn!(role = %self.role, "Model response hit max_tokens limit");
                    messages.push(Message {
                        role: "assistant".to_string(),
                        content: MessageContent::Blocks(response.content),
                    });
                    messages.push(Message {
                        role: "user".to_string(),
                        content: MessageContent::Text("Please continue.".to_string()),
                    });
                }
                other => {
                    return Err(AppError::Agent(format!(
                        "Unexpected stop reason: {other}"
                    )));
                }
            }
        }

        Err(AppError::Agent(format!(
            "{} hit the conversation turn limit ({}) without finishing",
            self.role, self.max_turns
        )))
    }
}

/// Build the production agent set, one per role, with role-appropriate
/// tool surfaces. The reviewer gets no tools: its verdict is free text
/// interpreted by the controller.
pub fn build_agents(client: Arc<ModelClient>, max_turns: u32) -> HashMap<AgentRole, Arc<dyn Agent>> {
    let mut agents: HashMap<AgentRole, Arc<dyn Agent>> = HashMap::new();

    for role in [
        AgentRole::Requirements,
        AgentRole::TestAuthor,
        AgentRole::Implementer,
        AgentRole::Reviewer,
    ] {
        let tools: Vec<Box<dyn Tool>> = match role {
            AgentRole::Requirements | AgentRole::TestAuthor => {
                vec![Box::new(UpdateStateTool), Box::new(AskHumanTool)]
            }
            AgentRole::Implementer => vec![
                Box::new(UpdateStateTool),
                Box::new(RunCommandTool),
                Box::new(AskHumanTool),
            ],
            AgentRole::Reviewer => Vec::new(),
        };

        agents.insert(
            role,
            Arc::new(ModelAgent::new(
                role,
                Arc::clone(&client),
                ToolRegistry::new(tools),
                max_turns,
            )),
        );
    }

    agents
}
