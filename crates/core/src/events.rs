//! Typed events flowing from controllers to the pool and from the pool to listeners.

use crate::types::{AgentStatus, LogEntry, SessionResult, TerminalStatus};
use serde::{Deserialize, Serialize};

/// Emitted by a session controller while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Log(LogEntry),
    Status {
        status: AgentStatus,
        step: Option<String>,
    },
}

/// Emitted by the pool; the only surface exposed to the remote controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    #[serde(rename_all = "camelCase")]
    Log { agent_id: String, log: LogEntry },
    #[serde(rename_all = "camelCase")]
    Status {
        agent_id: String,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        agent_id: String,
        status: TerminalStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        execution_time_ms: u64,
    },
}

impl PoolEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            PoolEvent::Log { agent_id, .. }
            | PoolEvent::Status { agent_id, .. }
            | PoolEvent::Complete { agent_id, .. } => agent_id,
        }
    }

    pub fn completion(result: &SessionResult) -> Self {
        PoolEvent::Complete {
            agent_id: result.agent_id.clone(),
            status: result.status,
            result: result.result.clone(),
            error: result.error.clone(),
            execution_time_ms: result.execution_time_ms,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::LogKind;

    #[test]
    fn test_completion_event_wire_shape() {
        let result = SessionResult {
            agent_id: "a1".to_string(),
            status: TerminalStatus::Failed,
            result: None,
            error: Some("Execution timeout after 100ms".to_string()),
            execution_time_ms: 104,
            logs: vec![],
            output_tail: vec![],
        };
        let value = serde_json::to_value(PoolEvent::completion(&result)).unwrap();
        assert_eq!(value["event"], "complete");
        assert_eq!(value["agentId"], "a1");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["executionTimeMs"], 104);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_log_event_wire_shape() {
        let event = PoolEvent::Log {
            agent_id: "a1".to_string(),
            log: LogEntry::new(LogKind::Stdout, "hi"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "log");
        assert_eq!(value["log"]["type"], "stdout");
        assert_eq!(event.agent_id(), "a1");
    }

    #[test]
    fn test_status_event_round_trip() {
        let event = PoolEvent::Status {
            agent_id: "a1".to_string(),
            status: AgentStatus::NeedsApproval,
            step: Some("Waiting for approval".to_string()),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"needs_approval\""));
        let parsed: PoolEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, event);
    }
}
