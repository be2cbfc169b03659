//! `portable-pty` backed implementation of the PTY primitive.

use crate::traits::{DataCallback, PtyError, PtyHandle, PtyOptions, PtySpawner};
use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct NativePtySpawner;

impl NativePtySpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PtySpawner for NativePtySpawner {
    async fn spawn(
        &self,
        shell: &str,
        options: PtyOptions,
        on_data: DataCallback,
    ) -> Result<Box<dyn PtyHandle>, PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        // Inherits the daemon's environment; overrides go on top.
        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(&options.cwd);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        // The reader only sees EOF once our copy of the slave side is gone.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        info!(pid, shell, cwd = %options.cwd.display(), "PTY spawned");

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let open = Arc::new(AtomicBool::new(true));
        spawn_reader(reader, on_data, Arc::clone(&open), pid)?;

        Ok(Box::new(NativePtyHandle {
            writer: Arc::new(Mutex::new(Some(writer))),
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(Some(child)),
            open,
        }))
    }
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    on_data: DataCallback,
    open: Arc<AtomicBool>,
    pid: u32,
) -> Result<(), PtyError> {
    std::thread::Builder::new()
        .name(format!("pty-reader-{}", pid))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            while open.load(Ordering::SeqCst) {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => on_data(&buf[..n]),
                    Err(e) => {
                        debug!(pid, error = %e, "PTY read ended");
                        break;
                    }
                }
            }
            debug!(pid, "PTY reader exited");
        })?;
    Ok(())
}

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

fn write_blocking(writer: &SharedWriter, bytes: &[u8]) -> Result<(), PtyError> {
    let mut guard = writer.lock();
    let writer = guard.as_mut().ok_or(PtyError::Closed)?;
    writer
        .write_all(bytes)
        .and_then(|_| writer.flush())
        .map_err(|e| PtyError::Write(e.to_string()))
}

pub struct NativePtyHandle {
    /// Only touched from blocking threads: a child that stops reading can
    /// fill the PTY and block a write indefinitely.
    writer: SharedWriter,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl PtyHandle for NativePtyHandle {
    async fn write(&self, data: &str) -> Result<(), PtyError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(PtyError::Closed);
        }
        let writer = Arc::clone(&self.writer);
        let bytes = data.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || write_blocking(&writer, &bytes))
            .await
            .map_err(|e| PtyError::Write(format!("write task failed: {}", e)))??;
        debug!(data_len = data.len(), "Wrote to PTY");
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let guard = self.master.lock();
        let master = guard.as_ref().ok_or(PtyError::Closed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    async fn close(&self) -> Result<(), PtyError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut child = self.child.lock().take();
        if let Some(child) = child.as_mut() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "Failed to kill PTY child");
                }
            }
        }

        // A write stuck on a full PTY still holds the writer; the killed child
        // unblocks it, so the writer is dropped and the child reaped off the runtime.
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            writer.lock().take();
            if let Some(mut child) = child {
                let _ = child.wait();
            }
        });

        self.master.lock().take();
        info!("PTY closed");
        Ok(())
    }
}
