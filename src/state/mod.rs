pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow status, the sole driver of routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    NeedsRequirements,
    NeedsRequirementsCritique,
    NeedsTest,
    NeedsTestCritique,
    NeedsTestRevision,
    NeedsCode,
    NeedsTypeCheck,
    NeedsTestExecution,
    NeedsImplementationCritique,
    NeedsImplementationRevision,
    Completed,
    Failed,
    NeedsHumanInput,
}

impl RunStatus {
    /// Every status, in workflow order. Kept in sync with the enum so
    /// totality checks can iterate the full set.
    pub const ALL: [RunStatus; 13] = [
        RunStatus::NeedsRequirements,
        RunStatus::NeedsRequirementsCritique,
        RunStatus::NeedsTest,
        RunStatus::NeedsTestCritique,
        RunStatus::NeedsTestRevision,
        RunStatus::NeedsCode,
        RunStatus::NeedsTypeCheck,
        RunStatus::NeedsTestExecution,
        RunStatus::NeedsImplementationCritique,
        RunStatus::NeedsImplementationRevision,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::NeedsHumanInput,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NeedsRequirements => "NEEDS_REQUIREMENTS",
            RunStatus::NeedsRequirementsCritique => "NEEDS_REQUIREMENTS_CRITIQUE",
            RunStatus::NeedsTest => "NEEDS_TEST",
            RunStatus::NeedsTestCritique => "NEEDS_TEST_CRITIQUE",
            RunStatus::NeedsTestRevision => "NEEDS_TEST_REVISION",
            RunStatus::NeedsCode => "NEEDS_CODE",
            RunStatus::NeedsTypeCheck => "NEEDS_TYPE_CHECK",
            RunStatus::NeedsTestExecution => "NEEDS_TEST_EXECUTION",
            RunStatus::NeedsImplementationCritique => "NEEDS_IMPLEMENTATION_CRITIQUE",
            RunStatus::NeedsImplementationRevision => "NEEDS_IMPLEMENTATION_REVISION",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::NeedsHumanInput => "NEEDS_HUMAN_INPUT",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        let normalized = s.trim().to_ascii_uppercase();
        RunStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one run. Agent-driven mutation flows through
/// [`WorkflowState::apply_patch`] or the failure helpers so the
/// terminal-status/error invariant holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub task_description: String,
    pub status: RunStatus,
    pub sandbox_ref: Option<String>,
    pub requirements: Option<String>,
    pub test_code: Option<String>,
    pub implementation_code: Option<String>,
    pub critique_text: Option<String>,
    pub last_command_output: Option<String>,
    pub error: Option<String>,
    pub revision_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(run_id: impl Into<String>, task_description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            task_description: task_description.into(),
            status: RunStatus::NeedsRequirements,
            sandbox_ref: None,
            requirements: None,
            test_code: None,
            implementation_code: None,
            critique_text: None,
            last_command_output: None,
            error: None,
            revision_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update. Writing an artifact consumes the critique
    /// it answered and invalidates everything built on the old version,
    /// so downstream agents never read stale inputs.
    pub fn apply_patch(&mut self, patch: StatePatch) {
        if let Some(requirements) = patch.requirements {
            self.requirements = Some(requirements);
            self.test_code = None;
            self.implementation_code = None;
            self.critique_text = None;
        }
        if let Some(test_code) = patch.test_code {
            self.test_code = Some(test_code);
            self.implementation_code = None;
            self.last_command_output = None;
            self.critique_text = None;
        }
        if let Some(implementation_code) = patch.implementation_code {
            self.implementation_code = Some(implementation_code);
            self.last_command_output = None;
            self.critique_text = None;
        }
        if let Some(critique_text) = patch.critique_text {
            self.critique_text = Some(critique_text);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }

    /// Force the run into terminal failure with the reason recorded.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

/// Partial state update, the shape accepted by the `update_state` tool
/// and by the human-input signal payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub test_code: Option<String>,
    #[serde(default)]
    pub implementation_code: Option<String>,
    #[serde(default)]
    pub critique_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_serde() {
        for status in RunStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            let back: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
            // Wire form matches as_str
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(
            RunStatus::parse("needs_test_revision"),
            Some(RunStatus::NeedsTestRevision)
        );
        assert_eq!(RunStatus::parse(" COMPLETED "), Some(RunStatus::Completed));
        assert_eq!(RunStatus::parse("NOT_A_STATUS"), None);
    }

    #[test]
    fn test_new_state_starts_at_needs_requirements() {
        let state = WorkflowState::new("run-1", "write an add function");
        assert_eq!(state.status, RunStatus::NeedsRequirements);
        assert_eq!(state.revision_count, 0);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_writing_requirements_invalidates_downstream_artifacts() {
        let mut state = WorkflowState::new("run-1", "task");
        state.test_code = Some("old tests".into());
        state.implementation_code = Some("old impl".into());
        state.critique_text = Some("old critique".into());

        state.apply_patch(StatePatch {
            requirements: Some("new requirements".into()),
            status: Some(RunStatus::NeedsRequirementsCritique),
            ..Default::default()
        });

        assert_eq!(state.requirements.as_deref(), Some("new requirements"));
        assert!(state.test_code.is_none());
        assert!(state.implementation_code.is_none());
        assert!(state.critique_text.is_none());
        assert_eq!(state.status, RunStatus::NeedsRequirementsCritique);
    }

    #[test]
    fn test_fail_sets_error_and_terminal_status() {
        let mut state = WorkflowState::new("run-1", "task");
        state.fail("boom");
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert!(state.status.is_terminal());
    }
}
