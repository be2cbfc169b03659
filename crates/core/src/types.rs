use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of interactive process a session drives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentType {
    #[serde(rename = "claude-code")]
    ClaudeCode,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "claude-code",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "claude-code" => Ok(AgentType::ClaudeCode),
            other => Err(other.to_string()),
        }
    }
}

/// Lifecycle status of a managed session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Initializing,
    Running,
    NeedsApproval,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    /// Active sessions count against the pool's concurrency cap.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AgentStatus::Pending
                | AgentStatus::Initializing
                | AgentStatus::Running
                | AgentStatus::NeedsApproval
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Initializing => "initializing",
            AgentStatus::Running => "running",
            AgentStatus::NeedsApproval => "needs_approval",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three ways a session can end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Failed,
    Cancelled,
}

impl From<TerminalStatus> for AgentStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => AgentStatus::Completed,
            TerminalStatus::Failed => AgentStatus::Failed,
            TerminalStatus::Cancelled => AgentStatus::Cancelled,
        }
    }
}

impl TerminalStatus {
    /// Narrow a registry status back to a terminal one, if it is terminal.
    pub fn from_status(status: AgentStatus) -> Option<Self> {
        match status {
            AgentStatus::Completed => Some(TerminalStatus::Completed),
            AgentStatus::Failed => Some(TerminalStatus::Failed),
            AgentStatus::Cancelled => Some(TerminalStatus::Cancelled),
            _ => None,
        }
    }
}

/// Per-session options supplied with a spawn request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,
    /// Wall-clock execution timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub stream_output: bool,
}

fn default_auto_approve() -> bool {
    true
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_approve: default_auto_approve(),
            timeout: None,
            stream_output: false,
        }
    }
}

/// Immutable record produced once when a session terminates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub agent_id: String,
    pub status: TerminalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub logs: Vec<String>,
    #[serde(default)]
    pub output_tail: Vec<String>,
}

/// Terminal state inferred by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    Initializing,
    Ready,
    Working,
    NeedsApproval,
    Completed,
    Error,
}

/// Control action recommended by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObserverAction {
    Wait,
    SendApproval,
    SendRejection,
    ReportComplete,
    ReportError,
}

/// One structured read of the terminal, consumed immediately by a controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub state: ObservedState,
    pub confidence: f32,
    pub action: ObserverAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    pub fn new(state: ObservedState, confidence: f32, action: ObserverAction) -> Self {
        Self {
            state,
            confidence,
            action,
            summary: None,
            error: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Origin of a log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
    Status,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub content: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl LogEntry {
    pub fn new(kind: LogKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn note(content: impl Into<String>) -> Self {
        Self::new(LogKind::Note, content)
    }
}
