use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::tools::ToolContext;
use crate::agent::{Agent, AgentRole};
use crate::config::{SandboxConfig, WorkflowConfig};
use crate::critique::{next_status, CritiqueInterpreter};
use crate::error::{AppError, Result};
use crate::router::{critique_stage, route, ExternalStep, Next, StopReason};
use crate::sandbox::{Sandbox, IMPLEMENTATION_FILE, TEST_FILE};
use crate::state::store::StateStore;
use crate::state::{RunStatus, StatePatch, WorkflowState};
use crate::steps::{step_key, StepRunner};

pub const MAX_REVISIONS_ERROR: &str = "max revisions exceeded";
pub const NO_PROGRESS_ERROR: &str = "agent made no progress after grace retry";
pub const HUMAN_TIMEOUT_ERROR: &str = "human input timed out";

/// Signal name the run parks on while awaiting human input.
pub fn human_input_signal(run_id: &str) -> String {
    format!("{run_id}:human_input")
}

/// Serializable record of an agent turn, so turns can live inside
/// durable steps and be replayed from their memoized result on resume.
#[derive(Debug, Serialize, Deserialize)]
struct TurnRecord {
    text: String,
    updated_state: bool,
    human_input_request: Option<String>,
}

/// Drives the route → act → persist cycle for one run.
///
/// Strictly sequential per run: router, agent, tools and state mutation
/// are ordered, and the only hard guarantee against infinite cycling is
/// the revision budget enforced here.
pub struct Controller {
    store: Arc<dyn StateStore>,
    steps: Arc<dyn StepRunner>,
    sandbox: Arc<dyn Sandbox>,
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
    interpreter: Arc<dyn CritiqueInterpreter>,
    workflow: WorkflowConfig,
    commands: SandboxConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn StateStore>,
        steps: Arc<dyn StepRunner>,
        sandbox: Arc<dyn Sandbox>,
        agents: HashMap<AgentRole, Arc<dyn Agent>>,
        interpreter: Arc<dyn CritiqueInterpreter>,
        workflow: WorkflowConfig,
        commands: SandboxConfig,
    ) -> Self {
        Self {
            store,
            steps,
            sandbox,
            agents,
            interpreter,
            workflow,
            commands,
        }
    }

    /// Run the loop to a terminal status (or until cancelled).
    ///
    /// Any error escaping an iteration is recorded in `state.error` with
    /// the status forced to FAILED before it is returned, so persisted
    /// state is never stale after a crash.
    pub async fn run(&self, run_id: &str, cancel: Arc<AtomicBool>) -> Result<WorkflowState> {
        match self.drive(run_id, cancel).await {
            Ok(state) => Ok(state),
            Err(e) => {
                if let Ok(Some(mut state)) = self.store.get(run_id).await {
                    if !state.status.is_terminal() {
                        state.fail(e.to_string());
                        if let Err(persist_err) = self.store.set(run_id, &state).await {
                            tracing::error!(
                                run_id = %run_id,
                                error = %persist_err,
                                "Failed to persist failure state"
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, run_id: &str, cancel: Arc<AtomicBool>) -> Result<WorkflowState> {
        let mut no_progress_retries = 0u32;

        for iteration in 0..self.workflow.max_iterations {
            let mut state = self
                .store
                .get(run_id)
                .await?
                .ok_or_else(|| AppError::RunNotFound(run_id.to_string()))?;

            // Cooperative cancellation: an externally forced FAILED is
            // picked up by the get above; a shutdown flag parks the run
            // as-is, resumable with the same run_id.
            if cancel.load(Ordering::SeqCst) && !state.status.is_terminal() {
                tracing::info!(run_id = %run_id, status = %state.status, "Run cancelled");
                return Ok(state);
            }

            if !state.status.is_terminal() && state.revision_count >= self.workflow.max_revisions {
                state.fail(MAX_REVISIONS_ERROR);
                self.store.set(run_id, &state).await?;
                return Ok(state);
            }

            tracing::info!(
                run_id = %run_id,
                iteration = iteration,
                status = %state.status,
                revisions = state.revision_count,
                "Controller iteration"
            );

            match route(&state) {
                Next::Agent(role) => {
                    let before = state.status;
                    let turn = self.run_agent_step(run_id, role, &state, iteration).await?;

                    if let Some(question) = turn.human_input_request {
                        let mut state = self.reload(run_id).await?;
                        state.apply_patch(StatePatch {
                            status: Some(RunStatus::NeedsHumanInput),
                            critique_text: Some(question),
                            ..Default::default()
                        });
                        self.store.set(run_id, &state).await?;
                        continue;
                    }

                    if role == AgentRole::Reviewer {
                        self.apply_critique(run_id, before, &turn.text).await?;
                        no_progress_retries = 0;
                        continue;
                    }

                    let after = self.reload(run_id).await?;
                    if after.status == before {
                        if no_progress_retries == 0 {
                            no_progress_retries = 1;
                            tracing::warn!(
                                run_id = %run_id,
                                role = %role,
                                "Agent left status unchanged, granting one grace retry"
                            );
                            continue;
                        }
                        let mut state = after;
                        state.fail(NO_PROGRESS_ERROR);
                        self.store.set(run_id, &state).await?;
                        return Ok(state);
                    }
                    no_progress_retries = 0;
                }

                Next::Stop(StopReason::Completed) | Next::Stop(StopReason::Failed) => {
                    tracing::info!(run_id = %run_id, status = %state.status, "Run reached terminal status");
                    return Ok(state);
                }

                Next::Stop(StopReason::AwaitHumanInput) => {
                    self.await_human_input(run_id).await?;
                }

                Next::Stop(StopReason::External(step)) => {
                    self.run_external_step(run_id, step, iteration).await?;
                }
            }
        }

        let mut state = self.reload(run_id).await?;
        if !state.status.is_terminal() {
            state.fail(format!(
                "iteration budget ({}) exhausted",
                self.workflow.max_iterations
            ));
            self.store.set(run_id, &state).await?;
        }
        Ok(state)
    }

    async fn reload(&self, run_id: &str) -> Result<WorkflowState> {
        self.store
            .get(run_id)
            .await?
            .ok_or_else(|| AppError::RunNotFound(run_id.to_string()))
    }

    /// Invoke one agent turn inside a durable step keyed by
    /// run/role/iteration, so a resume replays the memoized turn instead
    /// of re-calling the model.
    async fn run_agent_step(
        &self,
        run_id: &str,
        role: AgentRole,
        state: &WorkflowState,
        iteration: u32,
    ) -> Result<TurnRecord> {
        let agent = self
            .agents
            .get(&role)
            .ok_or_else(|| AppError::Internal(format!("No agent registered for role {role}")))?;

        let ctx = ToolContext {
            run_id: run_id.to_string(),
            store: Arc::clone(&self.store),
            sandbox: Arc::clone(&self.sandbox),
        };

        let step_name = step_key(run_id, role.name(), iteration);
        let agent = Arc::clone(agent);
        let snapshot = state.clone();

        let value = self
            .steps
            .run_step(
                &step_name,
                Box::pin(async move {
                    let turn = agent.act(&snapshot, &ctx).await?;
                    Ok(serde_json::to_value(TurnRecord {
                        text: turn.text,
                        updated_state: turn.updated_state,
                        human_input_request: turn.human_input_request,
                    })?)
                }),
            )
            .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Turn the reviewer's free text into the next status and apply it
    /// with a single state update.
    async fn apply_critique(
        &self,
        run_id: &str,
        critique_status: RunStatus,
        raw_text: &str,
    ) -> Result<()> {
        let stage = critique_stage(critique_status).ok_or_else(|| {
            AppError::Internal(format!(
                "Reviewer ran outside a critique status: {critique_status}"
            ))
        })?;

        let decision = self.interpreter.interpret(raw_text);

        if let Some(error) = &decision.error {
            // The reviewer reported its own failure, not a verdict.
            let mut state = self.reload(run_id).await?;
            state.fail(error.clone());
            self.store.set(run_id, &state).await?;
            return Ok(());
        }

        if decision.ambiguous {
            tracing::warn!(
                run_id = %run_id,
                "Ambiguous critique, defaulting to needs-revision"
            );
        }

        let next = next_status(stage, &decision);
        tracing::info!(
            run_id = %run_id,
            approved = decision.approved,
            next_status = %next,
            "Critique interpreted"
        );

        let mut state = self.reload(run_id).await?;
        state.apply_patch(StatePatch {
            status: Some(next),
            critique_text: decision
                .needs_revision
                .then(|| decision.rationale.clone()),
            ..Default::default()
        });

        if decision.needs_revision {
            state.revision_count += 1;
        }

        self.store.set(run_id, &state).await?;
        Ok(())
    }

    /// Park the run until a human answers or the wait times out.
    /// The payload is a state patch; absent a status it restarts the
    /// analysis with the answer on record.
    async fn await_human_input(&self, run_id: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.workflow.human_input_timeout_secs);
        let signal = human_input_signal(run_id);

        tracing::info!(run_id = %run_id, "Suspending for human input");

        let payload = self.steps.wait_for_signal(&signal, timeout).await?;
        let mut state = self.reload(run_id).await?;

        match payload {
            Some(value) => {
                let mut patch: StatePatch =
                    serde_json::from_value(value).unwrap_or_default();
                if patch.status.is_none() {
                    patch.status = Some(RunStatus::NeedsRequirements);
                }
                state.apply_patch(patch);
                self.store.set(run_id, &state).await?;
            }
            None => {
                state.fail(HUMAN_TIMEOUT_ERROR);
                self.store.set(run_id, &state).await?;
            }
        }
        Ok(())
    }

    /// Delegate a type check or test run to the sandbox inside a durable
    /// step. Success advances the pipeline; failure records the output
    /// and sends the implementation back for revision.
    async fn run_external_step(
        &self,
        run_id: &str,
        step: ExternalStep,
        iteration: u32,
    ) -> Result<()> {
        let mut state = self.reload(run_id).await?;

        let sandbox_ref = match &state.sandbox_ref {
            Some(r) => r.clone(),
            None => {
                let r = self.sandbox.create_session().await?;
                state.sandbox_ref = Some(r.clone());
                self.store.set(run_id, &state).await?;
                r
            }
        };

        if let Some(test_code) = &state.test_code {
            self.sandbox
                .write_file(&sandbox_ref, TEST_FILE, test_code)
                .await?;
        }
        if let Some(implementation) = &state.implementation_code {
            self.sandbox
                .write_file(&sandbox_ref, IMPLEMENTATION_FILE, implementation)
                .await?;
        }

        let args = match step {
            ExternalStep::TypeCheck => self.commands.type_check_command.clone(),
            ExternalStep::TestExecution => self.commands.test_command.clone(),
        };

        let step_name = step_key(run_id, step.name(), iteration);
        let sandbox = Arc::clone(&self.sandbox);
        let exec_ref = sandbox_ref.clone();

        let value = self
            .steps
            .run_step(
                &step_name,
                Box::pin(async move {
                    let output = sandbox.exec(&exec_ref, &args).await?;
                    Ok(json!({
                        "exit_code": output.exit_code,
                        "output": output.combined(),
                    }))
                }),
            )
            .await?;

        let exit_code = value["exit_code"].as_i64().unwrap_or(-1);
        let output = value["output"].as_str().unwrap_or_default().to_string();

        let mut state = self.reload(run_id).await?;
        state.last_command_output = Some(output);

        if exit_code == 0 {
            state.status = match step {
                ExternalStep::TypeCheck => RunStatus::NeedsTestExecution,
                ExternalStep::TestExecution => RunStatus::NeedsImplementationCritique,
            };
            tracing::info!(run_id = %run_id, step = step.name(), "External step passed");
        } else {
            tracing::warn!(
                run_id = %run_id,
                step = step.name(),
                exit_code = exit_code,
                "External step failed, sending implementation back for revision"
            );
            state.status = RunStatus::NeedsImplementationRevision;
            state.revision_count += 1;
        }

        self.store.set(run_id, &state).await?;
        Ok(())
    }
}
