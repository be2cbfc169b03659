//! Session supervision: one controller per interactive CLI, and a
//! concurrency-capped pool that owns them.

pub mod buffer;
pub mod controller;
pub mod pool;

pub use buffer::OutputBuffer;
pub use controller::{ControllerSettings, SessionController, SessionTask};
pub use pool::{AgentPool, PoolConfig, PoolSummary, SessionSnapshot, SpawnRequest};
