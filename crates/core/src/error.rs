use thiserror::Error;

/// Reasons a spawn request is rejected before any session exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Agent already exists: {0}")]
    DuplicateId(String),
    #[error("Unsupported agent type: {0}")]
    UnsupportedType(String),
    #[error("Capacity exceeded: {active} of {max} agents active")]
    CapacityExceeded { active: usize, max: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Session already started: {0}")]
    AlreadyStarted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_error_display() {
        let err = AdmissionError::DuplicateId("a1".to_string());
        assert_eq!(err.to_string(), "Agent already exists: a1");

        let err = AdmissionError::CapacityExceeded { active: 2, max: 2 };
        assert_eq!(err.to_string(), "Capacity exceeded: 2 of 2 agents active");
    }
}
