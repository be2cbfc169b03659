//! Fakes shared by the supervisor integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pilot_core::{Observation, ObservedState, ObserverAction, PoolEvent};
use pilot_observer::heuristics::detect;
use pilot_observer::{strip_ansi, StateObserver};
use pilot_pty::{DataCallback, PtyError, PtyHandle, PtyOptions, PtySpawner};
use pilot_supervisor::ControllerSettings;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

#[derive(Clone)]
struct Response {
    trigger: String,
    output: String,
    once: bool,
}

/// Records every write and replays scripted output.
#[derive(Default)]
pub struct FakePtySpawner {
    initial_output: String,
    responses: Vec<Response>,
    echo: bool,
    fail_spawn: bool,
    pub writes: Arc<Mutex<Vec<String>>>,
    pub spawned: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

impl FakePtySpawner {
    pub fn new(initial_output: &str) -> Self {
        Self {
            initial_output: initial_output.to_string(),
            ..Self::default()
        }
    }

    /// Emit `output` whenever exactly `trigger` is written.
    pub fn respond(mut self, trigger: &str, output: &str) -> Self {
        self.responses.push(Response {
            trigger: trigger.to_string(),
            output: output.to_string(),
            once: false,
        });
        self
    }

    /// Like [`respond`](Self::respond), but only for the first matching write.
    /// Checked in registration order, so put it before a catch-all response.
    pub fn respond_once(mut self, trigger: &str, output: &str) -> Self {
        self.responses.push(Response {
            trigger: trigger.to_string(),
            output: output.to_string(),
            once: true,
        });
        self
    }

    /// Echo every write back the way a terminal in cooked mode does.
    pub fn echo_input(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn count_writes(&self, data: &str) -> usize {
        self.writes.lock().iter().filter(|w| w.as_str() == data).count()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PtySpawner for FakePtySpawner {
    async fn spawn(
        &self,
        _shell: &str,
        _options: PtyOptions,
        on_data: DataCallback,
    ) -> Result<Box<dyn PtyHandle>, PtyError> {
        if self.fail_spawn {
            return Err(PtyError::Spawn("no pty available".to_string()));
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        if !self.initial_output.is_empty() {
            on_data(self.initial_output.as_bytes());
        }
        Ok(Box::new(FakePty {
            on_data,
            responses: Mutex::new(self.responses.clone()),
            echo: self.echo,
            writes: Arc::clone(&self.writes),
            closed: Arc::clone(&self.closed),
            open: AtomicBool::new(true),
        }))
    }
}

struct FakePty {
    on_data: DataCallback,
    responses: Mutex<Vec<Response>>,
    echo: bool,
    writes: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
    open: AtomicBool,
}

#[async_trait]
impl PtyHandle for FakePty {
    async fn write(&self, data: &str) -> Result<(), PtyError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(PtyError::Closed);
        }
        self.writes.lock().push(data.to_string());
        if self.echo {
            (self.on_data)(data.replace('\r', "\r\n").as_bytes());
        }
        let output = {
            let mut responses = self.responses.lock();
            match responses.iter().position(|r| r.trigger == data) {
                Some(idx) if responses[idx].once => Some(responses.remove(idx).output),
                Some(idx) => Some(responses[idx].output.clone()),
                None => None,
            }
        };
        if let Some(output) = output {
            (self.on_data)(output.as_bytes());
        }
        Ok(())
    }

    fn resize(&self, _cols: u16, _rows: u16) -> Result<(), PtyError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PtyError::Closed)
        }
    }

    async fn close(&self) -> Result<(), PtyError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

type Classify = dyn Fn(&str, bool) -> Observation + Send + Sync;

/// Deterministic classifier driven by a closure over (buffer, goal_submitted).
pub struct ScriptedObserver {
    classify: Box<Classify>,
    delay_after_submit: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedObserver {
    pub fn new(classify: impl Fn(&str, bool) -> Observation + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, classify)
    }

    fn with_delay(
        delay_after_submit: Duration,
        classify: impl Fn(&str, bool) -> Observation + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            classify: Box::new(classify),
            delay_after_submit,
            calls: AtomicUsize::new(0),
        })
    }

    /// Always ready, but every read after goal submission takes `delay`.
    pub fn slow_after_submit(delay: Duration) -> Arc<Self> {
        Self::with_delay(delay, |_, _| {
            Observation::new(ObservedState::Ready, 0.9, ObserverAction::Wait)
        })
    }

    /// Always reports an idle, ready prompt.
    pub fn always_ready() -> Arc<Self> {
        Self::new(|_, _| Observation::new(ObservedState::Ready, 0.9, ObserverAction::Wait))
    }

    /// Never lets the session settle.
    pub fn always_working() -> Arc<Self> {
        Self::new(|_, _| Observation::new(ObservedState::Working, 0.5, ObserverAction::Wait))
    }

    /// Ready once the CLI prompt is up, working afterwards.
    pub fn ready_then_working() -> Arc<Self> {
        Self::new(|_, submitted| {
            if submitted {
                Observation::new(ObservedState::Working, 0.5, ObserverAction::Wait)
            } else {
                Observation::new(ObservedState::Ready, 0.9, ObserverAction::Wait)
            }
        })
    }

    /// Uses the real heuristic pass; reports completion once `done_marker` shows up.
    pub fn heuristic(done_marker: &'static str) -> Arc<Self> {
        Self::new(move |buffer, submitted| {
            let text = strip_ansi(buffer);
            if submitted && text.contains(done_marker) {
                return Observation::new(ObservedState::Completed, 0.9, ObserverAction::ReportComplete)
                    .with_summary("Goal finished");
            }
            detect(&text, submitted, 12).unwrap_or_else(|| {
                Observation::new(ObservedState::Working, 0.4, ObserverAction::Wait)
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateObserver for ScriptedObserver {
    async fn observe(&self, buffer: &str, _goal: &str, goal_submitted: bool) -> Observation {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if goal_submitted && !self.delay_after_submit.is_zero() {
            tokio::time::sleep(self.delay_after_submit).await;
        }
        (self.classify)(buffer, goal_submitted)
    }
}

/// Millisecond-scale timings so sessions finish quickly.
pub fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        shell: "/bin/sh".to_string(),
        poll_interval_ms: 10,
        startup_timeout_ms: 2_000,
        default_timeout_ms: 5_000,
        submit_delay_ms: 5,
        approval_pause_ms: 5,
        flush_delay_ms: 5,
        idle_polls_before_confirm: 2,
        ..ControllerSettings::default()
    }
}

/// Next completion event for `agent_id`, skipping everything else.
pub async fn next_completion(
    events: &mut broadcast::Receiver<PoolEvent>,
    agent_id: &str,
) -> PoolEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event @ PoolEvent::Complete { .. }) if event.agent_id() == agent_id => {
                    return event;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("completion event")
}
