//! Per-session controller: launch, wait for ready, submit the goal, then
//! observe and act until the session ends.

use crate::buffer::OutputBuffer;
use parking_lot::Mutex;
use pilot_core::{
    AgentStatus, ControllerError, ControllerEvent, LogEntry, LogKind, Observation, ObservedState,
    ObserverAction, SessionOptions, SessionResult, TerminalStatus,
};
use pilot_observer::ansi::{last_non_empty_lines, strip_ansi};
use pilot_observer::heuristics::approval_marker;
use pilot_observer::StateObserver;
use pilot_pty::{DataCallback, PtyError, PtyHandle, PtyOptions, PtySpawner};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const SUBMIT_KEY: &str = "\r";
pub const APPROVE_KEYS: &str = "y\r";
pub const REJECT_KEYS: &str = "n\r";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerSettings {
    pub shell: String,
    /// Command typed into the shell to start the interactive CLI.
    pub cli_command: String,
    pub exit_command: String,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
    pub poll_interval_ms: u64,
    pub startup_timeout_ms: u64,
    /// Used when a spawn request carries no timeout of its own.
    pub default_timeout_ms: u64,
    pub submit_delay_ms: u64,
    pub approval_pause_ms: u64,
    pub flush_delay_ms: u64,
    pub idle_polls_before_confirm: u32,
    /// Trailing lines searched for a prompt that is still on screen after it was answered.
    pub prompt_window_lines: usize,
    pub buffer_cap_chars: usize,
    pub log_tail_lines: usize,
    pub output_tail_lines: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            cli_command: "claude".to_string(),
            exit_command: "exit\r".to_string(),
            cols: 120,
            rows: 40,
            env: HashMap::new(),
            poll_interval_ms: 2_000,
            startup_timeout_ms: 60_000,
            default_timeout_ms: 30 * 60 * 1_000,
            submit_delay_ms: 300,
            approval_pause_ms: 500,
            flush_delay_ms: 200,
            idle_polls_before_confirm: 3,
            prompt_window_lines: 12,
            buffer_cap_chars: 50_000,
            log_tail_lines: 50,
            output_tail_lines: 20,
        }
    }
}

/// What a controller is asked to do.
#[derive(Debug, Clone)]
pub struct SessionTask {
    pub agent_id: String,
    pub goal: String,
    pub cwd: PathBuf,
    pub options: SessionOptions,
}

enum Outcome {
    Completed(Option<String>),
    Failed(String),
    Cancelled,
}

/// Early exit from a phase of the run.
type Phase<T> = Result<T, Outcome>;

#[derive(Default)]
struct ApprovalState {
    /// Buffer position (in characters) just before the last answer was written.
    answered_at: Option<u64>,
    answered_keys: &'static str,
    awaiting: bool,
    decision: Option<bool>,
}

pub struct SessionController {
    task: SessionTask,
    settings: ControllerSettings,
    observer: Arc<dyn StateObserver>,
    spawner: Arc<dyn PtySpawner>,
    events: mpsc::UnboundedSender<ControllerEvent>,
    started: AtomicBool,
    running: AtomicBool,
    cancelled: AtomicBool,
    goal_submitted: AtomicBool,
    wake: Notify,
    handle: tokio::sync::Mutex<Option<Box<dyn PtyHandle>>>,
    buffer: Arc<Mutex<OutputBuffer>>,
    approval: Mutex<ApprovalState>,
    logs: Mutex<VecDeque<String>>,
}

impl SessionController {
    pub fn new(
        task: SessionTask,
        settings: ControllerSettings,
        observer: Arc<dyn StateObserver>,
        spawner: Arc<dyn PtySpawner>,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(OutputBuffer::new(settings.buffer_cap_chars)));
        Self {
            task,
            settings,
            observer,
            spawner,
            events,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            goal_submitted: AtomicBool::new(false),
            wake: Notify::new(),
            handle: tokio::sync::Mutex::new(None),
            buffer,
            approval: Mutex::new(ApprovalState::default()),
            logs: Mutex::new(VecDeque::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.task.agent_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the session to completion. Single use.
    pub async fn start(&self) -> Result<SessionResult, ControllerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::AlreadyStarted(self.task.agent_id.clone()));
        }
        // A stop that raced ahead of start still wins.
        if !self.cancelled.load(Ordering::SeqCst) {
            self.running.store(true, Ordering::SeqCst);
        }

        let started_at = Instant::now();
        let timeout_ms = self
            .task
            .options
            .timeout
            .unwrap_or(self.settings.default_timeout_ms);
        let deadline = started_at + Duration::from_millis(timeout_ms);

        info!(agent_id = %self.task.agent_id, timeout_ms, "Session starting");
        let outcome = match self.run(deadline, timeout_ms).await {
            Ok(outcome) | Err(outcome) => outcome,
        };

        self.running.store(false, Ordering::SeqCst);
        self.cleanup().await;

        let outcome = if self.cancelled.load(Ordering::SeqCst) {
            Outcome::Cancelled
        } else {
            outcome
        };

        let (status, result, error) = match outcome {
            Outcome::Completed(summary) => (TerminalStatus::Completed, summary, None),
            Outcome::Failed(error) => (TerminalStatus::Failed, None, Some(error)),
            Outcome::Cancelled => (
                TerminalStatus::Cancelled,
                None,
                Some("Session cancelled".to_string()),
            ),
        };
        self.record(LogKind::Status, format!("Session {}", AgentStatus::from(status)));

        let execution_time_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            agent_id = %self.task.agent_id,
            status = %AgentStatus::from(status),
            execution_time_ms,
            "Session finished"
        );

        Ok(SessionResult {
            agent_id: self.task.agent_id.clone(),
            status,
            result,
            error,
            execution_time_ms,
            logs: self.logs.lock().iter().cloned().collect(),
            output_tail: self.output_tail(),
        })
    }

    /// Request cancellation and tear the terminal down.
    pub async fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        self.cleanup().await;
    }

    /// Deliver an external decision for a suspended approval prompt.
    ///
    /// Returns false when no prompt is waiting.
    pub fn approve(&self, approved: bool) -> bool {
        let mut approval = self.approval.lock();
        if !approval.awaiting {
            return false;
        }
        approval.decision = Some(approved);
        drop(approval);
        self.wake.notify_one();
        true
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let guard = self.handle.lock().await;
        guard.as_ref().ok_or(PtyError::Closed)?.resize(cols, rows)
    }

    async fn run(&self, deadline: Instant, timeout_ms: u64) -> Phase<Outcome> {
        self.ensure_running()?;
        self.launch().await?;
        self.wait_for_ready(deadline, timeout_ms).await?;
        self.submit_goal().await?;
        self.monitor(deadline, timeout_ms).await
    }

    async fn launch(&self) -> Phase<()> {
        self.set_status(AgentStatus::Initializing, Some("Launching terminal".to_string()));

        let buffer = Arc::clone(&self.buffer);
        let events = self.events.clone();
        let stream_output = self.task.options.stream_output;
        let on_data: DataCallback = Arc::new(move |bytes: &[u8]| {
            let chunk = buffer.lock().push(bytes);
            if stream_output && !chunk.is_empty() {
                let _ = events.send(ControllerEvent::Log(LogEntry::new(LogKind::Stdout, chunk)));
            }
        });

        let options = PtyOptions {
            cwd: self.task.cwd.clone(),
            cols: self.settings.cols,
            rows: self.settings.rows,
            env: self.settings.env.clone(),
        };
        let handle = self
            .spawner
            .spawn(&self.settings.shell, options, on_data)
            .await
            .map_err(|e| Outcome::Failed(format!("Failed to start terminal: {}", e)))?;
        *self.handle.lock().await = Some(handle);

        self.ensure_running()?;
        self.record(LogKind::Note, format!("Starting {}", self.settings.cli_command));
        self.write(&format!("{}{}", self.settings.cli_command, SUBMIT_KEY))
            .await
            .map_err(|e| Outcome::Failed(format!("Failed to start CLI: {}", e)))
    }

    async fn wait_for_ready(&self, deadline: Instant, timeout_ms: u64) -> Phase<()> {
        let startup_deadline =
            Instant::now() + Duration::from_millis(self.settings.startup_timeout_ms);

        loop {
            self.pause(self.poll_interval()).await;
            self.ensure_running()?;
            self.ensure_startup(startup_deadline, deadline, timeout_ms)?;

            let observation = self.observe().await;
            self.ensure_running()?;
            self.ensure_startup(startup_deadline, deadline, timeout_ms)?;

            match observation.state {
                ObservedState::Ready => {
                    debug!(agent_id = %self.task.agent_id, "CLI ready");
                    return Ok(());
                }
                ObservedState::Error => {
                    return Err(Outcome::Failed(error_text(
                        &observation,
                        "CLI reported an error during startup",
                    )));
                }
                ObservedState::NeedsApproval => self.handle_approval(&observation).await?,
                _ => self.release_pending_approval(),
            }
        }
    }

    async fn submit_goal(&self) -> Phase<()> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(Outcome::Cancelled)?;

        // Text and submit go out separately; some CLIs treat a trailing
        // newline inside pasted text as part of the paste.
        handle
            .write(&self.task.goal)
            .await
            .map_err(|e| Outcome::Failed(format!("Failed to submit goal: {}", e)))?;
        tokio::time::sleep(Duration::from_millis(self.settings.submit_delay_ms)).await;
        handle
            .write(SUBMIT_KEY)
            .await
            .map_err(|e| Outcome::Failed(format!("Failed to submit goal: {}", e)))?;
        drop(guard);

        self.goal_submitted.store(true, Ordering::SeqCst);
        self.record(LogKind::Note, "Goal submitted");
        self.set_status(AgentStatus::Running, Some("Goal submitted".to_string()));
        Ok(())
    }

    async fn monitor(&self, deadline: Instant, timeout_ms: u64) -> Phase<Outcome> {
        let mut last_total = self.total_bytes();
        let mut idle_polls: u32 = 0;
        let mut last_step: Option<String> = None;

        loop {
            self.pause(self.poll_interval()).await;
            self.ensure_running()?;
            ensure_deadline(deadline, timeout_ms)?;

            let observation = self.observe().await;
            self.ensure_running()?;
            ensure_deadline(deadline, timeout_ms)?;

            if observation.state != ObservedState::NeedsApproval {
                self.release_pending_approval();
            }

            match observation.action {
                ObserverAction::Wait => {
                    if observation.summary.is_some() && observation.summary != last_step {
                        last_step = observation.summary.clone();
                        self.set_status(AgentStatus::Running, last_step.clone());
                    }
                }
                ObserverAction::SendApproval => self.handle_approval(&observation).await?,
                ObserverAction::SendRejection => {
                    if !self.prompt_already_answered() {
                        self.answer_prompt(REJECT_KEYS, "Rejecting prompt").await?;
                    }
                }
                ObserverAction::ReportComplete => {
                    return Ok(Outcome::Completed(observation.summary));
                }
                ObserverAction::ReportError => {
                    return Ok(Outcome::Failed(error_text(
                        &observation,
                        "CLI reported an error",
                    )));
                }
            }

            let total = self.total_bytes();
            if total != last_total {
                last_total = total;
                idle_polls = 0;
                continue;
            }
            idle_polls += 1;

            if idle_polls >= self.settings.idle_polls_before_confirm
                && !self.approval.lock().awaiting
            {
                idle_polls = 0;
                debug!(agent_id = %self.task.agent_id, "Output idle, confirming");
                let confirmation = self.observe().await;
                self.ensure_running()?;
                ensure_deadline(deadline, timeout_ms)?;
                if matches!(
                    confirmation.state,
                    ObservedState::Ready | ObservedState::Completed
                ) {
                    self.record(LogKind::Note, "Output went idle after the goal");
                    return Ok(Outcome::Completed(
                        confirmation.summary.or(observation.summary),
                    ));
                }
            }
        }
    }

    async fn handle_approval(&self, observation: &Observation) -> Phase<()> {
        if self.prompt_already_answered() {
            return Ok(());
        }

        if self.task.options.auto_approve {
            let reason = observation
                .summary
                .clone()
                .unwrap_or_else(|| "Approval prompt".to_string());
            return self
                .answer_prompt(APPROVE_KEYS, &format!("Auto-approving: {}", reason))
                .await;
        }

        let decision = {
            let mut approval = self.approval.lock();
            if !approval.awaiting {
                approval.awaiting = true;
                approval.decision = None;
                drop(approval);
                self.record(LogKind::Note, "Waiting for approval");
                self.set_status(AgentStatus::NeedsApproval, observation.summary.clone());
                return Ok(());
            }
            approval.decision.take()
        };

        match decision {
            Some(true) => self.answer_prompt(APPROVE_KEYS, "Approved by request").await?,
            Some(false) => self.answer_prompt(REJECT_KEYS, "Denied by request").await?,
            None => return Ok(()),
        }
        self.approval.lock().awaiting = false;
        self.set_status(self.resumed_status(), None);
        Ok(())
    }

    async fn answer_prompt(&self, keys: &'static str, note: &str) -> Phase<()> {
        let mark = self.buffer.lock().total_chars();
        {
            let mut approval = self.approval.lock();
            approval.answered_at = Some(mark);
            approval.answered_keys = keys;
        }
        self.record(LogKind::Note, note);
        self.write(keys)
            .await
            .map_err(|e| Outcome::Failed(format!("Failed to answer prompt: {}", e)))?;
        self.pause(Duration::from_millis(self.settings.approval_pause_ms))
            .await;
        Ok(())
    }

    /// Whether the prompt in view is the one answered last.
    ///
    /// Output after the answer (the terminal echoing the keys, a redraw) does
    /// not make it a new prompt; a fresh approval marker after the answer does.
    /// When no marker is visible at all the prompt came from the semantic
    /// reading, and anything beyond the echoed keys counts as new.
    fn prompt_already_answered(&self) -> bool {
        let (mark, keys) = {
            let approval = self.approval.lock();
            match approval.answered_at {
                Some(mark) => (mark, approval.answered_keys),
                None => return false,
            }
        };

        let (since, screen) = {
            let buffer = self.buffer.lock();
            (strip_ansi(buffer.text_since(mark)), strip_ansi(buffer.text()))
        };
        if approval_marker(&since).is_some() {
            return false;
        }
        let window = last_non_empty_lines(&screen, self.settings.prompt_window_lines).join("\n");
        if approval_marker(&window).is_some() {
            return true;
        }
        let echoed = since.trim();
        echoed.is_empty() || echoed == keys.trim()
    }

    /// Drop a suspended approval whose prompt is no longer on screen.
    fn release_pending_approval(&self) {
        let mut approval = self.approval.lock();
        if !approval.awaiting {
            return;
        }
        approval.awaiting = false;
        approval.decision = None;
        drop(approval);
        self.record(LogKind::Note, "Approval prompt went away");
        self.set_status(self.resumed_status(), None);
    }

    fn resumed_status(&self) -> AgentStatus {
        if self.goal_submitted.load(Ordering::SeqCst) {
            AgentStatus::Running
        } else {
            AgentStatus::Initializing
        }
    }

    async fn observe(&self) -> Observation {
        let snapshot = self.buffer.lock().text().to_string();
        let submitted = self.goal_submitted.load(Ordering::SeqCst);
        let observation = self
            .observer
            .observe(&snapshot, &self.task.goal, submitted)
            .await;
        debug!(
            agent_id = %self.task.agent_id,
            state = ?observation.state,
            action = ?observation.action,
            confidence = observation.confidence,
            "Observed"
        );
        observation
    }

    async fn write(&self, data: &str) -> Result<(), PtyError> {
        let guard = self.handle.lock().await;
        match guard.as_ref() {
            Some(handle) => handle.write(data).await,
            None => Err(PtyError::Closed),
        }
    }

    /// Best effort: exit the shell, let output flush, close the terminal.
    async fn cleanup(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if let Err(e) = handle.write(&self.settings.exit_command).await {
            debug!(agent_id = %self.task.agent_id, error = %e, "Exit command not delivered");
        }
        tokio::time::sleep(Duration::from_millis(self.settings.flush_delay_ms)).await;
        if let Err(e) = handle.close().await {
            warn!(agent_id = %self.task.agent_id, error = %e, "Failed to close terminal");
        }
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }

    fn ensure_running(&self) -> Phase<()> {
        if self.running.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Outcome::Cancelled)
        }
    }

    fn ensure_startup(
        &self,
        startup_deadline: Instant,
        deadline: Instant,
        timeout_ms: u64,
    ) -> Phase<()> {
        ensure_deadline(deadline, timeout_ms)?;
        if Instant::now() >= startup_deadline {
            return Err(Outcome::Failed(format!(
                "Startup timeout: CLI not ready after {}ms",
                self.settings.startup_timeout_ms
            )));
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.poll_interval_ms)
    }

    fn total_bytes(&self) -> u64 {
        self.buffer.lock().total_bytes()
    }

    fn output_tail(&self) -> Vec<String> {
        let stripped = strip_ansi(self.buffer.lock().text());
        last_non_empty_lines(&stripped, self.settings.output_tail_lines)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn set_status(&self, status: AgentStatus, step: Option<String>) {
        let line = match &step {
            Some(step) => format!("{}: {}", status, step),
            None => status.to_string(),
        };
        self.push_log(line);
        let _ = self.events.send(ControllerEvent::Status { status, step });
    }

    fn record(&self, kind: LogKind, content: impl Into<String>) {
        let entry = LogEntry::new(kind, content);
        self.push_log(entry.content.clone());
        let _ = self.events.send(ControllerEvent::Log(entry));
    }

    fn push_log(&self, line: String) {
        let mut logs = self.logs.lock();
        logs.push_back(line);
        while logs.len() > self.settings.log_tail_lines {
            logs.pop_front();
        }
    }
}

fn ensure_deadline(deadline: Instant, timeout_ms: u64) -> Phase<()> {
    if Instant::now() >= deadline {
        Err(Outcome::Failed(format!(
            "Execution timeout after {}ms",
            timeout_ms
        )))
    } else {
        Ok(())
    }
}

fn error_text(observation: &Observation, default: &str) -> String {
    observation
        .error
        .clone()
        .or_else(|| observation.summary.clone())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.poll_interval_ms, 2_000);
        assert_eq!(settings.startup_timeout_ms, 60_000);
        assert_eq!(settings.default_timeout_ms, 1_800_000);
        assert_eq!(settings.buffer_cap_chars, 50_000);
        assert_eq!(settings.idle_polls_before_confirm, 3);
        assert_eq!(settings.prompt_window_lines, 12);
    }

    #[test]
    fn test_error_text_prefers_error_then_summary() {
        let observation = Observation::new(ObservedState::Error, 0.9, ObserverAction::ReportError);
        assert_eq!(error_text(&observation, "fallback"), "fallback");

        let observation = observation.with_summary("crashed");
        assert_eq!(error_text(&observation, "fallback"), "crashed");

        let observation = observation.with_error("panic in tool");
        assert_eq!(error_text(&observation, "fallback"), "panic in tool");
    }

    #[tokio::test]
    async fn test_deadline_in_past_is_timeout() {
        let deadline = Instant::now() - Duration::from_millis(1);
        match ensure_deadline(deadline, 50) {
            Err(Outcome::Failed(error)) => assert!(error.contains("timeout")),
            _ => panic!("expected timeout"),
        }
    }
}
