//! Fast path for terminal states that need no semantic judgement.

use crate::ansi::last_non_empty_lines;
use once_cell::sync::Lazy;
use pilot_core::{Observation, ObservedState, ObserverAction};
use regex::Regex;

#[allow(clippy::expect_used)]
static YES_NO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[(\[]\s*(?:y|yes)\s*/\s*(?:n|no)\s*[)\]]").expect("yes/no pattern is valid")
});

// Singular on purpose: status bars print "bypass permissions on" permanently.
#[allow(clippy::expect_used)]
static PERMISSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpermission\b").expect("permission pattern is valid"));

#[allow(clippy::expect_used)]
static ALLOW_QUESTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\ballow\b[^\n?]{0,160}\?").expect("allow pattern is valid"));

#[allow(clippy::expect_used)]
static PROCEED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)do you want to proceed\s*\?").expect("proceed pattern is valid")
});

#[allow(clippy::expect_used)]
static IDLE_PROMPT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[>❯›]\s*$").expect("prompt pattern is valid"));

pub const APPROVAL_CONFIDENCE: f32 = 0.95;
pub const IDLE_PROMPT_CONFIDENCE: f32 = 0.9;

/// Which approval marker fired, for logs and summaries.
pub fn approval_marker(active_region: &str) -> Option<&'static str> {
    if YES_NO_PATTERN.is_match(active_region) {
        Some("yes/no prompt")
    } else if ALLOW_QUESTION_PATTERN.is_match(active_region) {
        Some("allow question")
    } else if PROCEED_PATTERN.is_match(active_region) {
        Some("proceed question")
    } else if PERMISSION_PATTERN.is_match(active_region) {
        Some("permission request")
    } else {
        None
    }
}

/// A bare prompt glyph on the last visible line.
pub fn is_idle_prompt(lines: &[&str]) -> bool {
    lines
        .last()
        .map(|line| IDLE_PROMPT_PATTERN.is_match(line))
        .unwrap_or(false)
}

/// Classify `text` (already stripped) without a semantic call, if it is unambiguous.
///
/// Only the last `window_lines` non-blank lines are inspected so prompts that
/// have already scrolled past do not keep firing.
pub fn detect(text: &str, goal_submitted: bool, window_lines: usize) -> Option<Observation> {
    let lines = last_non_empty_lines(text, window_lines.max(1));
    if lines.is_empty() {
        return None;
    }
    let active_region = lines.join("\n");

    if let Some(marker) = approval_marker(&active_region) {
        return Some(
            Observation::new(
                ObservedState::NeedsApproval,
                APPROVAL_CONFIDENCE,
                ObserverAction::SendApproval,
            )
            .with_summary(format!("Approval prompt detected ({})", marker)),
        );
    }

    // After submission an idle prompt is ambiguous (done vs. between steps).
    if !goal_submitted && is_idle_prompt(&lines) {
        return Some(
            Observation::new(ObservedState::Ready, IDLE_PROMPT_CONFIDENCE, ObserverAction::Wait)
                .with_summary("Prompt is waiting for input"),
        );
    }

    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_no_prompt_requests_approval() {
        let observation = detect("Running tool\nAllow this action? (y/n)", true, 12).unwrap();
        assert_eq!(observation.state, ObservedState::NeedsApproval);
        assert_eq!(observation.action, ObserverAction::SendApproval);
    }

    #[test]
    fn test_bracketed_and_spelled_out_variants() {
        assert!(approval_marker("Continue? [Y/n]").is_some());
        assert!(approval_marker("Overwrite file (yes/no)").is_some());
        assert!(approval_marker("Continue? [ y / N ]").is_some());
    }

    #[test]
    fn test_permission_word() {
        assert_eq!(
            approval_marker("Claude needs your permission to use Bash"),
            Some("permission request")
        );
        assert_eq!(approval_marker("⏵⏵ bypass permissions on"), None);
    }

    #[test]
    fn test_allow_question() {
        assert_eq!(
            approval_marker("Allow edits to src/main.rs?"),
            Some("allow question")
        );
        assert_eq!(approval_marker("This will allow faster builds."), None);
    }

    #[test]
    fn test_idle_prompt_before_submission_is_ready() {
        let observation = detect("Welcome to the CLI\n\n> ", false, 12).unwrap();
        assert_eq!(observation.state, ObservedState::Ready);
        assert_eq!(observation.action, ObserverAction::Wait);

        let observation = detect("Tips for getting started\n❯ ", false, 12).unwrap();
        assert_eq!(observation.state, ObservedState::Ready);
    }

    #[test]
    fn test_idle_prompt_after_submission_is_deferred() {
        assert!(detect("Working on it\n> ", true, 12).is_none());
    }

    #[test]
    fn test_stale_prompt_outside_window_is_ignored() {
        let mut text = String::from("Allow this action? (y/n)\n");
        for i in 0..20 {
            text.push_str(&format!("line {}\n", i));
        }
        assert!(detect(&text, true, 12).is_none());
    }

    #[test]
    fn test_ordinary_output_is_not_classified() {
        assert!(detect("Compiling pilot v0.1.0\nReading files...", true, 12).is_none());
        assert!(detect("", false, 12).is_none());
    }
}
