//! Shared data model for supervised interactive CLI sessions.

pub mod error;
pub mod events;
pub mod metrics;
pub mod types;

pub use error::{AdmissionError, ControllerError};
pub use events::{ControllerEvent, PoolEvent};
pub use metrics::{PoolStats, PoolStatsSnapshot};
pub use types::*;
