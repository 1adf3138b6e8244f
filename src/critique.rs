use serde::Deserialize;

use crate::router::CritiqueStage;
use crate::state::RunStatus;

/// Structured accept/revise decision derived from raw reviewer text.
/// Ephemeral: only the resulting status is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CritiqueDecision {
    pub approved: bool,
    pub needs_revision: bool,
    /// True when no marker matched and the conservative default applied.
    pub ambiguous: bool,
    pub rationale: String,
    /// Set when the text reads as an agent failure, not a review outcome.
    pub error: Option<String>,
}

impl CritiqueDecision {
    fn approved(rationale: &str) -> Self {
        Self {
            approved: true,
            needs_revision: false,
            ambiguous: false,
            rationale: rationale.to_string(),
            error: None,
        }
    }

    fn needs_revision(rationale: &str, ambiguous: bool) -> Self {
        Self {
            approved: false,
            needs_revision: true,
            ambiguous,
            rationale: rationale.to_string(),
            error: None,
        }
    }

    fn failure(raw: &str) -> Self {
        Self {
            approved: false,
            needs_revision: false,
            ambiguous: false,
            rationale: raw.to_string(),
            error: Some(raw.to_string()),
        }
    }
}

/// Strategy seam for turning reviewer output into a decision, so a
/// structured-output variant can replace keyword matching without
/// touching the controller.
pub trait CritiqueInterpreter: Send + Sync {
    fn interpret(&self, raw: &str) -> CritiqueDecision;
}

const APPROVAL_MARKERS: [&str; 3] = ["approved", "lgtm", "looks good"];
const REVISION_MARKERS: [&str; 4] = ["revision", "issue", "fix", "problem"];
const ERROR_MARKERS: [&str; 2] = ["error:", "failed:"];

/// Default interpreter: case-insensitive marker matching.
///
/// Precedence: approval beats the error markers, error markers beat
/// revision markers, and anything unmatched defaults to needs-revision.
pub struct KeywordInterpreter;

impl CritiqueInterpreter for KeywordInterpreter {
    fn interpret(&self, raw: &str) -> CritiqueDecision {
        let text = raw.to_lowercase();

        let approved = APPROVAL_MARKERS.iter().any(|m| text.contains(m))
            || contains_word(&text, "ok");

        if !approved && ERROR_MARKERS.iter().any(|m| text.contains(m)) {
            return CritiqueDecision::failure(raw);
        }

        if approved {
            return CritiqueDecision::approved(raw);
        }

        if REVISION_MARKERS.iter().any(|m| text.contains(m)) {
            return CritiqueDecision::needs_revision(raw, false);
        }

        CritiqueDecision::needs_revision(raw, true)
    }
}

/// Bare "ok" counts only as a whole word; "broken" must not approve.
fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == word)
}

#[derive(Debug, Deserialize)]
struct StructuredCritique {
    approved: bool,
    #[serde(default)]
    rationale: Option<String>,
}

/// Interpreter for schema-constrained reviewer output: a JSON document
/// `{"approved": bool, "rationale": "..."}` takes precedence; anything
/// that does not parse falls back to keyword matching.
pub struct StructuredInterpreter {
    fallback: KeywordInterpreter,
}

impl StructuredInterpreter {
    pub fn new() -> Self {
        Self {
            fallback: KeywordInterpreter,
        }
    }
}

impl Default for StructuredInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl CritiqueInterpreter for StructuredInterpreter {
    fn interpret(&self, raw: &str) -> CritiqueDecision {
        match serde_json::from_str::<StructuredCritique>(raw.trim()) {
            Ok(parsed) => {
                let rationale = parsed.rationale.unwrap_or_else(|| raw.to_string());
                if parsed.approved {
                    CritiqueDecision::approved(&rationale)
                } else {
                    CritiqueDecision::needs_revision(&rationale, false)
                }
            }
            Err(_) => self.fallback.interpret(raw),
        }
    }
}

/// Map a non-failure decision at a critique stage to the next status.
///
/// The status set has no requirements-revision state; a revise decision
/// there returns to NEEDS_REQUIREMENTS and still counts as a revision
/// iteration in the controller.
pub fn next_status(stage: CritiqueStage, decision: &CritiqueDecision) -> RunStatus {
    match (stage, decision.approved) {
        (CritiqueStage::Requirements, true) => RunStatus::NeedsTest,
        (CritiqueStage::Requirements, false) => RunStatus::NeedsRequirements,
        (CritiqueStage::Test, true) => RunStatus::NeedsCode,
        (CritiqueStage::Test, false) => RunStatus::NeedsTestRevision,
        (CritiqueStage::Implementation, true) => RunStatus::Completed,
        (CritiqueStage::Implementation, false) => RunStatus::NeedsImplementationRevision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_markers_always_approve() {
        let interp = KeywordInterpreter;
        for text in [
            "Approved, ship it",
            "LGTM",
            "This looks good to me",
            "ok",
            "Everything checks out. OK.",
        ] {
            let decision = interp.interpret(text);
            assert!(decision.approved, "expected approval for {text:?}");
            assert!(!decision.needs_revision);
        }
    }

    #[test]
    fn test_revision_markers_always_need_revision() {
        let interp = KeywordInterpreter;
        for text in [
            "Revision needed: off-by-one in the loop",
            "There is an issue with null handling",
            "Please fix the import order",
            "I see a problem with the edge cases",
        ] {
            let decision = interp.interpret(text);
            assert!(decision.needs_revision, "expected revision for {text:?}");
            assert!(!decision.approved);
            assert!(!decision.ambiguous);
        }
    }

    #[test]
    fn test_error_marker_without_approval_is_agent_failure() {
        let interp = KeywordInterpreter;
        let decision = interp.interpret("Error: model returned empty response");
        assert!(decision.error.is_some());
        assert!(!decision.approved);
        assert!(!decision.needs_revision);
    }

    #[test]
    fn test_approval_beats_error_marker() {
        let interp = KeywordInterpreter;
        let decision = interp.interpret("One test logged 'error:' but overall approved");
        assert!(decision.approved);
        assert!(decision.error.is_none());
    }

    #[test]
    fn test_ambiguous_text_never_approves() {
        let interp = KeywordInterpreter;
        let decision = interp.interpret("The code is broken in subtle ways");
        assert!(!decision.approved);
        assert!(decision.needs_revision);
        assert!(decision.ambiguous);
    }

    #[test]
    fn test_ok_matches_whole_word_only() {
        let interp = KeywordInterpreter;
        // "broken" contains "ok" as a substring but must not approve
        let decision = interp.interpret("broken");
        assert!(!decision.approved);
    }

    #[test]
    fn test_structured_output_takes_precedence() {
        let interp = StructuredInterpreter::new();
        let decision =
            interp.interpret(r#"{"approved": false, "rationale": "looks good but wrong"}"#);
        // Keyword matching would approve on "looks good"; the structured
        // field wins.
        assert!(!decision.approved);
        assert!(decision.needs_revision);
        assert_eq!(decision.rationale, "looks good but wrong");
    }

    #[test]
    fn test_structured_falls_back_to_keywords() {
        let interp = StructuredInterpreter::new();
        let decision = interp.interpret("LGTM, nice work");
        assert!(decision.approved);
    }

    #[test]
    fn test_next_status_mapping() {
        use crate::router::CritiqueStage;
        let approved = KeywordInterpreter.interpret("approved");
        let revise = KeywordInterpreter.interpret("needs fix");

        assert_eq!(
            next_status(CritiqueStage::Requirements, &approved),
            RunStatus::NeedsTest
        );
        assert_eq!(
            next_status(CritiqueStage::Requirements, &revise),
            RunStatus::NeedsRequirements
        );
        assert_eq!(
            next_status(CritiqueStage::Test, &approved),
            RunStatus::NeedsCode
        );
        assert_eq!(
            next_status(CritiqueStage::Test, &revise),
            RunStatus::NeedsTestRevision
        );
        assert_eq!(
            next_status(CritiqueStage::Implementation, &approved),
            RunStatus::Completed
        );
        assert_eq!(
            next_status(CritiqueStage::Implementation, &revise),
            RunStatus::NeedsImplementationRevision
        );
    }
}
