use crate::agent::AgentRole;
use crate::state::{RunStatus, WorkflowState};

/// External work the controller delegates out of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalStep {
    TypeCheck,
    TestExecution,
}

impl ExternalStep {
    pub fn name(&self) -> &'static str {
        match self {
            ExternalStep::TypeCheck => "type_check",
            ExternalStep::TestExecution => "test_execution",
        }
    }
}

/// Why the router stopped instead of naming an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Failed,
    AwaitHumanInput,
    External(ExternalStep),
}

/// Routing outcome: the next actor, or a stop the controller resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Agent(AgentRole),
    Stop(StopReason),
}

/// Pure routing function: status in, next actor out.
///
/// Total over [`RunStatus`] by exhaustive match; read-only over state and
/// never panics, so the controller can call it unconditionally.
pub fn route(state: &WorkflowState) -> Next {
    match state.status {
        RunStatus::NeedsRequirements => Next::Agent(AgentRole::Requirements),

        RunStatus::NeedsTest | RunStatus::NeedsTestRevision => Next::Agent(AgentRole::TestAuthor),

        RunStatus::NeedsCode | RunStatus::NeedsImplementationRevision => {
            Next::Agent(AgentRole::Implementer)
        }

        RunStatus::NeedsRequirementsCritique
        | RunStatus::NeedsTestCritique
        | RunStatus::NeedsImplementationCritique => Next::Agent(AgentRole::Reviewer),

        RunStatus::NeedsTypeCheck => Next::Stop(StopReason::External(ExternalStep::TypeCheck)),
        RunStatus::NeedsTestExecution => {
            Next::Stop(StopReason::External(ExternalStep::TestExecution))
        }

        RunStatus::NeedsHumanInput => Next::Stop(StopReason::AwaitHumanInput),
        RunStatus::Completed => Next::Stop(StopReason::Completed),
        RunStatus::Failed => Next::Stop(StopReason::Failed),
    }
}

/// The critique stage a reviewer turn belongs to, derived from status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueStage {
    Requirements,
    Test,
    Implementation,
}

pub fn critique_stage(status: RunStatus) -> Option<CritiqueStage> {
    match status {
        RunStatus::NeedsRequirementsCritique => Some(CritiqueStage::Requirements),
        RunStatus::NeedsTestCritique => Some(CritiqueStage::Test),
        RunStatus::NeedsImplementationCritique => Some(CritiqueStage::Implementation),
        _ => None,
    }
}
