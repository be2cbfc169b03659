use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("Failed to spawn PTY: {0}")]
    Spawn(String),
    #[error("PTY write failed: {0}")]
    Write(String),
    #[error("PTY resize failed: {0}")]
    Resize(String),
    #[error("PTY is closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives every chunk of output read from the terminal.
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PtyOptions {
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            cols: 120,
            rows: 40,
            env: HashMap::new(),
        }
    }
}

/// A live pseudo-terminal with a shell attached.
#[async_trait]
pub trait PtyHandle: Send + Sync {
    async fn write(&self, data: &str) -> Result<(), PtyError>;

    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// Terminate the child and release the terminal. Idempotent.
    async fn close(&self) -> Result<(), PtyError>;
}

#[async_trait]
pub trait PtySpawner: Send + Sync {
    async fn spawn(
        &self,
        shell: &str,
        options: PtyOptions,
        on_data: DataCallback,
    ) -> Result<Box<dyn PtyHandle>, PtyError>;
}
