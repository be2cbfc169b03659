//! Newline-delimited JSON spoken on stdin/stdout.
//!
//! Commands come in tagged by `type`; replies go out tagged by `type`, and
//! pool events go out tagged by `event`.

use pilot_supervisor::{PoolSummary, SessionSnapshot, SpawnRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SpawnAgent(SpawnRequest),
    #[serde(rename_all = "camelCase")]
    KillAgent { agent_id: String },
    #[serde(rename_all = "camelCase")]
    ApproveAgent { agent_id: String, approved: bool },
    #[serde(rename_all = "camelCase")]
    Status {
        #[serde(default)]
        agent_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    #[serde(rename_all = "camelCase")]
    SpawnResult {
        agent_id: String,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    KillResult { agent_id: String, killed: bool },
    #[serde(rename_all = "camelCase")]
    ApproveResult { agent_id: String, delivered: bool },
    Summary(PoolSummary),
    #[serde(rename_all = "camelCase")]
    AgentStatus {
        agent_id: String,
        agent: Option<SessionSnapshot>,
    },
    Error { message: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_command_wire_format() {
        let line = r#"{"type":"spawn_agent","agentId":"a1","agentType":"claude-code","goal":"list files","workingDirectory":"/tmp","options":{"timeout":60000}}"#;
        match serde_json::from_str::<Command>(line).unwrap() {
            Command::SpawnAgent(request) => {
                assert_eq!(request.agent_id, "a1");
                assert_eq!(request.goal, "list files");
                assert_eq!(request.options.timeout, Some(60000));
                assert!(request.options.auto_approve);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_kill_and_approve_commands() {
        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type":"kill_agent","agentId":"a1"}"#).unwrap(),
            Command::KillAgent {
                agent_id: "a1".to_string()
            }
        );
        assert_eq!(
            serde_json::from_str::<Command>(
                r#"{"type":"approve_agent","agentId":"a1","approved":false}"#
            )
            .unwrap(),
            Command::ApproveAgent {
                agent_id: "a1".to_string(),
                approved: false
            }
        );
        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type":"status"}"#).unwrap(),
            Command::Status { agent_id: None }
        );
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = Reply::SpawnResult {
            agent_id: "a1".to_string(),
            accepted: false,
            error: Some("Agent already exists: a1".to_string()),
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "spawn_result");
        assert_eq!(value["agentId"], "a1");
        assert_eq!(value["accepted"], false);

        let value = serde_json::to_value(Reply::KillResult {
            agent_id: "a1".to_string(),
            killed: true,
        })
        .unwrap();
        assert_eq!(value["type"], "kill_result");
        assert_eq!(value["killed"], true);
    }
}
