//! Concurrency-capped registry of supervised sessions.

use crate::controller::{ControllerSettings, SessionController, SessionTask};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pilot_core::{
    AdmissionError, AgentStatus, AgentType, ControllerError, ControllerEvent, LogEntry, PoolEvent,
    PoolStats, PoolStatsSnapshot, SessionOptions, SessionResult, TerminalStatus,
};
use pilot_observer::StateObserver;
use pilot_pty::PtySpawner;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_concurrent: usize,
    pub supported_types: Vec<AgentType>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            supported_types: vec![AgentType::ClaudeCode],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub agent_id: String,
    /// Kept as text so unknown types are reported as admission errors.
    pub agent_type: String,
    pub goal: String,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub options: SessionOptions,
}

impl SpawnRequest {
    pub fn new(agent_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: AgentType::ClaudeCode.to_string(),
            goal: goal.into(),
            working_directory: None,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

struct ManagedSession {
    agent_type: AgentType,
    goal: String,
    status: AgentStatus,
    step: Option<String>,
    created_at: DateTime<Utc>,
    created: Instant,
    controller: Arc<SessionController>,
    result: Option<SessionResult>,
}

impl ManagedSession {
    fn snapshot(&self, agent_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            agent_id: agent_id.to_string(),
            agent_type: self.agent_type,
            goal: self.goal.clone(),
            status: self.status,
            step: self.step.clone(),
            created_at: self.created_at,
            result: self.result.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub goal: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SessionResult>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub total: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub by_status: BTreeMap<String, usize>,
    pub sessions: Vec<SessionSnapshot>,
    pub stats: PoolStatsSnapshot,
}

struct PoolInner {
    config: PoolConfig,
    settings: ControllerSettings,
    observer: Arc<dyn StateObserver>,
    spawner: Arc<dyn PtySpawner>,
    sessions: RwLock<HashMap<String, ManagedSession>>,
    events: broadcast::Sender<PoolEvent>,
    stats: PoolStats,
}

/// Owns every supervised session. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

impl AgentPool {
    pub fn new(
        config: PoolConfig,
        settings: ControllerSettings,
        observer: Arc<dyn StateObserver>,
        spawner: Arc<dyn PtySpawner>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PoolInner {
                config,
                settings,
                observer,
                spawner,
                sessions: RwLock::new(HashMap::new()),
                events,
                stats: PoolStats::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Admit a session and start it in the background.
    ///
    /// Must be called from within a Tokio runtime. Completion is reported
    /// only through [`PoolEvent::Complete`].
    pub fn spawn(&self, request: SpawnRequest) -> Result<(), AdmissionError> {
        let admitted = self.admit(&request);
        let agent_type = match admitted {
            Ok(agent_type) => agent_type,
            Err(e) => {
                self.inner.stats.inc_rejected();
                metrics::counter!("pool_sessions_rejected", 1);
                warn!(agent_id = %request.agent_id, error = %e, "Spawn rejected");
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let cwd = request
            .working_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let controller = Arc::new(SessionController::new(
            SessionTask {
                agent_id: request.agent_id.clone(),
                goal: request.goal.clone(),
                cwd,
                options: request.options.clone(),
            },
            self.inner.settings.clone(),
            Arc::clone(&self.inner.observer),
            Arc::clone(&self.inner.spawner),
            tx,
        ));

        {
            let mut sessions = self.inner.sessions.write();
            // Re-checked under the write lock so concurrent spawns cannot overshoot.
            if let Err(e) = check_capacity(&sessions, &request.agent_id, self.inner.config.max_concurrent) {
                drop(sessions);
                self.inner.stats.inc_rejected();
                metrics::counter!("pool_sessions_rejected", 1);
                return Err(e);
            }
            sessions.insert(
                request.agent_id.clone(),
                ManagedSession {
                    agent_type,
                    goal: request.goal.clone(),
                    status: AgentStatus::Pending,
                    step: None,
                    created_at: Utc::now(),
                    created: Instant::now(),
                    controller: Arc::clone(&controller),
                    result: None,
                },
            );
        }

        self.inner.stats.inc_spawned();
        metrics::counter!("pool_sessions_spawned", 1);
        self.inner.publish_active_gauge();
        info!(agent_id = %request.agent_id, agent_type = %agent_type, "Agent spawned");
        self.inner.emit(PoolEvent::Status {
            agent_id: request.agent_id.clone(),
            status: AgentStatus::Pending,
            step: None,
        });

        tokio::spawn(run_session(
            Arc::clone(&self.inner),
            request.agent_id,
            controller,
            rx,
        ));
        Ok(())
    }

    fn admit(&self, request: &SpawnRequest) -> Result<AgentType, AdmissionError> {
        let sessions = self.inner.sessions.read();
        if sessions.contains_key(&request.agent_id) {
            return Err(AdmissionError::DuplicateId(request.agent_id.clone()));
        }
        drop(sessions);

        let agent_type = request
            .agent_type
            .parse::<AgentType>()
            .map_err(AdmissionError::UnsupportedType)?;
        if !self.inner.config.supported_types.contains(&agent_type) {
            return Err(AdmissionError::UnsupportedType(request.agent_type.clone()));
        }

        let sessions = self.inner.sessions.read();
        check_capacity(&sessions, &request.agent_id, self.inner.config.max_concurrent)?;
        Ok(agent_type)
    }

    /// Cancel an active session. False for unknown or already finished ids.
    pub fn kill(&self, agent_id: &str) -> bool {
        let controller = {
            let mut sessions = self.inner.sessions.write();
            let Some(session) = sessions.get_mut(agent_id) else {
                return false;
            };
            if session.status.is_terminal() {
                return false;
            }
            session.status = AgentStatus::Cancelled;
            session.step = None;
            Arc::clone(&session.controller)
        };

        self.inner.stats.inc_killed();
        self.inner.publish_active_gauge();
        info!(agent_id, "Agent killed");
        self.inner.emit(PoolEvent::Status {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Cancelled,
            step: None,
        });
        self.inner.emit(PoolEvent::Log {
            agent_id: agent_id.to_string(),
            log: LogEntry::note("Agent killed by request"),
        });

        tokio::spawn(async move { controller.stop().await });
        true
    }

    /// Forward an approval decision to a session suspended on a prompt.
    pub fn approve(&self, agent_id: &str, approved: bool) -> bool {
        let sessions = self.inner.sessions.read();
        match sessions.get(agent_id) {
            Some(session) if session.status.is_active() => session.controller.approve(approved),
            _ => false,
        }
    }

    pub fn get_active_count(&self) -> usize {
        count_active(&self.inner.sessions.read())
    }

    pub fn get_agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, agent_id: &str) -> Option<SessionSnapshot> {
        self.inner
            .sessions
            .read()
            .get(agent_id)
            .map(|session| session.snapshot(agent_id))
    }

    pub fn get_summary(&self) -> PoolSummary {
        let sessions = self.inner.sessions.read();
        let mut by_status = BTreeMap::new();
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .iter()
            .map(|(id, session)| {
                *by_status.entry(session.status.to_string()).or_insert(0) += 1;
                session.snapshot(id)
            })
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        PoolSummary {
            total: sessions.len(),
            active: count_active(&sessions),
            max_concurrent: self.inner.config.max_concurrent,
            by_status,
            sessions: snapshots,
            stats: self.inner.stats.snapshot(),
        }
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Purge terminal sessions older than `max_age`. Returns how many were removed.
    ///
    /// A killed session stays until its controller has reported a result, so
    /// its id cannot be reused while the old run is still winding down.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut sessions = self.inner.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| {
            !(session.status.is_terminal()
                && session.result.is_some()
                && session.created.elapsed() > max_age)
        });
        let purged = before - sessions.len();
        drop(sessions);

        if purged > 0 {
            self.inner.stats.add_purged(purged as u64);
            info!(purged, "Purged finished agents");
        }
        purged
    }

    /// Stop every active session and clear the registry.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, ManagedSession)> =
            self.inner.sessions.write().drain().collect();

        let mut stops = JoinSet::new();
        for (agent_id, session) in drained {
            if session.status.is_active() {
                debug!(agent_id = %agent_id, "Stopping agent for shutdown");
                let controller = session.controller;
                stops.spawn(async move { controller.stop().await });
            }
        }
        let stopping = stops.len();
        while let Some(joined) = stops.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Agent stop task failed");
            }
        }
        self.inner.publish_active_gauge();
        info!(stopped = stopping, "Pool shut down");
    }
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_active_gauge(&self) {
        let active = count_active(&self.sessions.read());
        metrics::gauge!("pool_active_sessions", active as f64);
    }

    /// Entry for `agent_id` if it still belongs to `controller`; ids are reusable.
    fn owned_by<'a>(
        sessions: &'a mut HashMap<String, ManagedSession>,
        agent_id: &str,
        controller: &Arc<SessionController>,
    ) -> Option<&'a mut ManagedSession> {
        sessions
            .get_mut(agent_id)
            .filter(|session| Arc::ptr_eq(&session.controller, controller))
    }

    fn apply(&self, agent_id: &str, controller: &Arc<SessionController>, event: ControllerEvent) {
        match event {
            ControllerEvent::Log(log) => self.emit(PoolEvent::Log {
                agent_id: agent_id.to_string(),
                log,
            }),
            ControllerEvent::Status { status, step } => {
                {
                    let mut sessions = self.sessions.write();
                    let Some(session) = Self::owned_by(&mut sessions, agent_id, controller) else {
                        return;
                    };
                    if session.status.is_terminal() {
                        return;
                    }
                    session.status = status;
                    session.step = step.clone();
                }
                self.emit(PoolEvent::Status {
                    agent_id: agent_id.to_string(),
                    status,
                    step,
                });
            }
        }
    }

    fn finish(
        &self,
        agent_id: &str,
        controller: &Arc<SessionController>,
        outcome: Result<SessionResult, ControllerError>,
    ) {
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => SessionResult {
                agent_id: agent_id.to_string(),
                status: TerminalStatus::Failed,
                result: None,
                error: Some(e.to_string()),
                execution_time_ms: 0,
                logs: Vec::new(),
                output_tail: Vec::new(),
            },
        };

        {
            let mut sessions = self.sessions.write();
            if let Some(session) = Self::owned_by(&mut sessions, agent_id, controller) {
                // A kill already decided the terminal status.
                if session.status == AgentStatus::Cancelled
                    && result.status != TerminalStatus::Cancelled
                {
                    result.status = TerminalStatus::Cancelled;
                    result.result = None;
                    result.error = Some("Session cancelled".to_string());
                }
                session.status = result.status.into();
                session.step = None;
                session.result = Some(result.clone());
            }
        }

        let status = AgentStatus::from(result.status);
        self.stats.record_finished(result.status);
        metrics::counter!("pool_sessions_finished", 1, "status" => status.as_str());
        self.publish_active_gauge();
        info!(
            agent_id,
            status = %status,
            execution_time_ms = result.execution_time_ms,
            "Agent finished"
        );
        self.emit(PoolEvent::completion(&result));
    }
}

async fn run_session(
    inner: Arc<PoolInner>,
    agent_id: String,
    controller: Arc<SessionController>,
    mut events: mpsc::UnboundedReceiver<ControllerEvent>,
) {
    let run = controller.start();
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => inner.apply(&agent_id, &controller, event),
            outcome = &mut run => break outcome,
        }
    };
    while let Ok(event) = events.try_recv() {
        inner.apply(&agent_id, &controller, event);
    }

    inner.finish(&agent_id, &controller, outcome);
}

fn count_active(sessions: &HashMap<String, ManagedSession>) -> usize {
    sessions
        .values()
        .filter(|session| session.status.is_active())
        .count()
}

fn check_capacity(
    sessions: &HashMap<String, ManagedSession>,
    agent_id: &str,
    max_concurrent: usize,
) -> Result<(), AdmissionError> {
    if sessions.contains_key(agent_id) {
        return Err(AdmissionError::DuplicateId(agent_id.to_string()));
    }
    let active = count_active(sessions);
    if active >= max_concurrent {
        return Err(AdmissionError::CapacityExceeded {
            active,
            max: max_concurrent,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spawn_request_from_wire() {
        let request: SpawnRequest = serde_json::from_value(json!({
            "agentId": "a1",
            "agentType": "claude-code",
            "goal": "list files",
            "options": {"autoApprove": false, "timeout": 5000}
        }))
        .unwrap();
        assert_eq!(request.agent_id, "a1");
        assert_eq!(request.working_directory, None);
        assert!(!request.options.auto_approve);
        assert_eq!(request.options.timeout, Some(5000));
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.supported_types, vec![AgentType::ClaudeCode]);
    }
}
