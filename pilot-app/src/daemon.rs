//! Composition root and stdin/stdout command loop.

use crate::config::{CleanupConfig, PilotConfig};
use crate::protocol::{Command, Reply};
use anyhow::Result;
use pilot_core::PoolEvent;
use pilot_observer::LlmStateObserver;
use pilot_providers::OpenAICompatibleProvider;
use pilot_pty::NativePtySpawner;
use pilot_supervisor::AgentPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire the production provider, classifier and PTY spawner into a pool.
pub fn build_pool(config: &PilotConfig) -> AgentPool {
    let provider = Arc::new(OpenAICompatibleProvider::new(
        config.provider.settings.clone(),
    ));
    let observer = Arc::new(LlmStateObserver::new(provider, config.observer.clone()));
    AgentPool::new(
        config.pool.clone(),
        config.controller.clone(),
        observer,
        Arc::new(NativePtySpawner::new()),
    )
}

pub fn handle_command(pool: &AgentPool, command: Command) -> Reply {
    match command {
        Command::SpawnAgent(request) => {
            let agent_id = request.agent_id.clone();
            match pool.spawn(request) {
                Ok(()) => Reply::SpawnResult {
                    agent_id,
                    accepted: true,
                    error: None,
                },
                Err(e) => Reply::SpawnResult {
                    agent_id,
                    accepted: false,
                    error: Some(e.to_string()),
                },
            }
        }
        Command::KillAgent { agent_id } => {
            let killed = pool.kill(&agent_id);
            Reply::KillResult { agent_id, killed }
        }
        Command::ApproveAgent { agent_id, approved } => {
            let delivered = pool.approve(&agent_id, approved);
            Reply::ApproveResult {
                agent_id,
                delivered,
            }
        }
        Command::Status { agent_id: None } => Reply::Summary(pool.get_summary()),
        Command::Status {
            agent_id: Some(agent_id),
        } => {
            let agent = pool.get(&agent_id);
            Reply::AgentStatus { agent_id, agent }
        }
    }
}

/// Parse and execute one input line. Blank lines produce no reply.
pub fn handle_line(pool: &AgentPool, line: &str) -> Option<Reply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Command>(line) {
        Ok(command) => {
            debug!(?command, "Command received");
            Some(handle_command(pool, command))
        }
        Err(e) => {
            warn!(error = %e, "Rejected malformed command");
            Some(Reply::Error {
                message: format!("Invalid command: {}", e),
            })
        }
    }
}

/// Serve commands from `input` until EOF or `shutdown` resolves, then stop
/// every session and flush their completion events to `output`.
pub async fn run<R, W, S>(
    pool: AgentPool,
    cleanup: &CleanupConfig,
    input: R,
    output: W,
    shutdown: S,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(output, out_rx));

    let (stop_tx, stop_rx) = oneshot::channel();
    let forwarder = tokio::spawn(forward_events(pool.subscribe(), out_tx.clone(), stop_rx));
    let cleaner = tokio::spawn(periodic_cleanup(pool.clone(), cleanup.clone()));

    info!("pilotd ready");
    let mut lines = input.lines();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = handle_line(&pool, &line) {
                        send_json(&out_tx, &reply);
                    }
                }
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input, shutting down");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    cleaner.abort();
    pool.shutdown().await;
    wait_for_completions(&pool).await;

    let _ = stop_tx.send(());
    if let Err(e) = forwarder.await {
        warn!(error = %e, "Event forwarder failed");
    }
    drop(out_tx);
    match writer.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "Output writer failed"),
    }
    info!("pilotd stopped");
    Ok(())
}

fn send_json<T: serde::Serialize>(out: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => warn!(error = %e, "Failed to serialize output"),
    }
}

async fn write_lines<W>(mut output: W, mut lines: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    output.shutdown().await?;
    Ok(())
}

async fn forward_events(
    mut events: broadcast::Receiver<PoolEvent>,
    out: mpsc::UnboundedSender<String>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => send_json(&out, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut stop => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        send_json(&out, &event);
    }
}

async fn periodic_cleanup(pool: AgentPool, config: CleanupConfig) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let purged = pool.cleanup(config.max_age());
        if purged > 0 {
            debug!(purged, "Periodic cleanup");
        }
    }
}

/// Give stopped sessions a bounded moment to report completion.
async fn wait_for_completions(pool: &AgentPool) {
    let waited = tokio::time::timeout(DRAIN_TIMEOUT, async {
        loop {
            let stats = pool.stats();
            if stats.finished() >= stats.spawned {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if waited.is_err() {
        warn!("Timed out waiting for sessions to report completion");
    }
}
