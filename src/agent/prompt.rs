use crate::agent::AgentRole;
use crate::state::{RunStatus, WorkflowState};

/// Build the role-specific system prompt from the current run state.
pub fn system_prompt(role: AgentRole, state: &WorkflowState) -> String {
    match role {
        AgentRole::Requirements => requirements_prompt(state),
        AgentRole::TestAuthor => test_author_prompt(state),
        AgentRole::Implementer => implementer_prompt(state),
        AgentRole::Reviewer => reviewer_prompt(state),
    }
}

/// The opening user message for a turn.
pub fn initial_message(role: AgentRole) -> String {
    match role {
        AgentRole::Requirements => {
            "Analyze the task and produce the requirements document.".to_string()
        }
        AgentRole::TestAuthor => "Write the test file for the requirements.".to_string(),
        AgentRole::Implementer => "Write the implementation that makes the tests pass.".to_string(),
        AgentRole::Reviewer => "Review the artifact and give your verdict.".to_string(),
    }
}

fn requirements_prompt(state: &WorkflowState) -> String {
    format!(
        r#"You are the requirements analyst in an automated test-driven development workflow.

## Task
{task}
{critique_section}
## Instructions
1. Restate the task as a numbered list of concrete, testable requirements.
2. Cover edge cases the task implies (empty input, invalid input, boundaries).
3. Keep requirements implementation-neutral; describe behavior, not code.
4. If the task is too ambiguous to pin down, use the ask_human tool instead of guessing.

When done, call update_state with your requirements in the `requirements` field and status `{next}`."#,
        task = state.task_description,
        critique_section = critique_section(state),
        next = RunStatus::NeedsRequirementsCritique,
    )
}

fn test_author_prompt(state: &WorkflowState) -> String {
    format!(
        r#"You are the test author in an automated test-driven development workflow.

## Task
{task}

## Requirements
{requirements}
{critique_section}
## Instructions
1. Write one complete pytest test file exercising every requirement.
2. Import the implementation from `solution` (it will live in solution.py).
3. One focused test function per requirement; include the edge cases.
4. Do not write any implementation code.

When done, call update_state with the full test file in the `test_code` field and status `{next}`."#,
        task = state.task_description,
        requirements = state.requirements.as_deref().unwrap_or("(none recorded)"),
        critique_section = critique_section(state),
        next = RunStatus::NeedsTestCritique,
    )
}

fn implementer_prompt(state: &WorkflowState) -> String {
    format!(
        r#"You are the implementer in an automated test-driven development workflow.

## Task
{task}

## Requirements
{requirements}

## Tests your code must pass
{tests}
{command_output_section}{critique_section}
## Instructions
1. Write the complete implementation file that makes every test pass.
2. You may use run_command to execute the tests against your draft before finishing.
3. Keep the implementation minimal; no features the tests do not demand.

When done, call update_state with the full implementation in the `implementation_code` field and status `{next}`."#,
        task = state.task_description,
        requirements = state.requirements.as_deref().unwrap_or("(none recorded)"),
        tests = state.test_code.as_deref().unwrap_or("(none recorded)"),
        command_output_section = command_output_section(state),
        critique_section = critique_section(state),
        next = RunStatus::NeedsTypeCheck,
    )
}

fn reviewer_prompt(state: &WorkflowState) -> String {
    let (artifact_name, artifact) = match state.status {
        RunStatus::NeedsRequirementsCritique => (
            "requirements document",
            state.requirements.as_deref().unwrap_or("(missing)"),
        ),
        RunStatus::NeedsTestCritique => (
            "test file",
            state.test_code.as_deref().unwrap_or("(missing)"),
        ),
        _ => (
            "implementation",
            state.implementation_code.as_deref().unwrap_or("(missing)"),
        ),
    };

    format!(
        r#"You are the reviewer in an automated test-driven development workflow.

## Task
{task}

## Artifact under review: {artifact_name}
{artifact}
{command_output_section}
## Instructions
Review the {artifact_name} against the task. Reply with plain text only; do not call tools.
- If it is correct and complete, start your reply with "Approved".
- If it needs changes, start with "Revision needed:" and list each concrete issue.
Be strict: an approval here ships the artifact."#,
        task = state.task_description,
        artifact_name = artifact_name,
        artifact = artifact,
        command_output_section = command_output_section(state),
    )
}

fn critique_section(state: &WorkflowState) -> String {
    match state.critique_text.as_deref() {
        Some(critique) if !critique.is_empty() => {
            format!("\n## Reviewer feedback on the previous version\n{critique}\n")
        }
        _ => String::new(),
    }
}

fn command_output_section(state: &WorkflowState) -> String {
    match state.last_command_output.as_deref() {
        Some(output) if !output.is_empty() => {
            format!("\n## Output of the last command run\n```\n{output}\n```\n")
        }
        _ => String::new(),
    }
}
