//! Errors returned to whoever starts a watch
//!
//! Degradation while a watch runs is reported through the sink as an
//! [`EventError`](dirwatch_core::EventError); these errors only cover the
//! synchronous start path.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The root could not be opened for change notification
    #[error("cannot watch {}: access denied or directory missing", .path.display())]
    Access { path: PathBuf },

    #[error("failed to spawn watch worker: {0}")]
    Spawn(#[source] io::Error),

    /// The worker ended before acknowledging its first read
    #[error("watch worker exited during startup")]
    WorkerExited,
}

pub type Result<T> = std::result::Result<T, WatchError>;
