//! Pseudo-terminal primitive used by session controllers.

pub mod native;
pub mod traits;

pub use native::NativePtySpawner;
pub use traits::{DataCallback, PtyError, PtyHandle, PtyOptions, PtySpawner};
