//! Parsing classifier replies into observations.

use pilot_core::Observation;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ObservationParseError {
    #[error("No JSON object in classifier response")]
    NoJson,
    #[error("Invalid observation: {0}")]
    Invalid(String),
    #[error("Confidence is not a finite number")]
    Confidence,
}

/// Parse a reply that should contain one JSON observation.
///
/// Tolerates code fences and prose around the object. Confidence is clamped
/// into `0.0..=1.0`; non-finite values are rejected.
pub fn parse_observation(text: &str) -> Result<Observation, ObservationParseError> {
    let candidate = extract_json_object(text).ok_or(ObservationParseError::NoJson)?;

    let mut observation: Observation = serde_json::from_str(candidate)
        .map_err(|e| ObservationParseError::Invalid(e.to_string()))?;

    if !observation.confidence.is_finite() {
        return Err(ObservationParseError::Confidence);
    }
    observation.confidence = observation.confidence.clamp(0.0, 1.0);
    observation.summary = observation.summary.filter(|s| !s.trim().is_empty());
    observation.error = observation.error.filter(|s| !s.trim().is_empty());

    Ok(observation)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pilot_core::{ObservedState, ObserverAction};

    #[test]
    fn test_plain_object() {
        let observation = parse_observation(
            r#"{"state":"completed","confidence":0.8,"action":"report_complete","summary":"Listed 4 files"}"#,
        )
        .unwrap();
        assert_eq!(observation.state, ObservedState::Completed);
        assert_eq!(observation.action, ObserverAction::ReportComplete);
        assert_eq!(observation.summary.as_deref(), Some("Listed 4 files"));
    }

    #[test]
    fn test_fenced_object_with_prose() {
        let text = "Here you go:\n```json\n{\"state\":\"working\",\"confidence\":0.4,\"action\":\"wait\"}\n```";
        let observation = parse_observation(text).unwrap();
        assert_eq!(observation.state, ObservedState::Working);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let observation =
            parse_observation(r#"{"state":"ready","confidence":7,"action":"wait"}"#).unwrap();
        assert_eq!(observation.confidence, 1.0);
    }

    #[test]
    fn test_blank_summary_dropped() {
        let observation =
            parse_observation(r#"{"state":"ready","confidence":0.5,"action":"wait","summary":"  "}"#)
                .unwrap();
        assert!(observation.summary.is_none());
    }

    #[test]
    fn test_rejects_unknown_state() {
        let result = parse_observation(r#"{"state":"sleeping","confidence":0.5,"action":"wait"}"#);
        assert!(matches!(result, Err(ObservationParseError::Invalid(_))));
    }

    #[test]
    fn test_rejects_missing_action() {
        let result = parse_observation(r#"{"state":"ready","confidence":0.5}"#);
        assert!(matches!(result, Err(ObservationParseError::Invalid(_))));
    }

    #[test]
    fn test_rejects_text_without_object() {
        assert_eq!(
            parse_observation("I think it is done."),
            Err(ObservationParseError::NoJson)
        );
        assert_eq!(parse_observation("} {"), Err(ObservationParseError::NoJson));
    }
}
