//! Directory change watching on the native notification API
//!
//! This crate provides:
//! - Asynchronous reads of directory change records (`ReadDirectoryChangesW`
//!   on Windows, inotify re-encoded into the same record layout on Linux)
//! - Lazy decoding of the packed record buffer
//! - Rename pairing into single events
//! - Overflow, abort and lost-handle reporting with automatic reopen
//! - A dedicated worker thread per watch with idempotent start/stop

pub mod buffer;
pub mod classify;
pub mod cycle;
pub mod decoder;
pub mod error;
pub mod handle;
pub mod platform;
pub mod rename;
pub mod watch_loop;

#[cfg(test)]
mod testing;

pub use buffer::{BufferError, NotificationBuffer, MIN_RECORD_SIZE};
pub use classify::PathClassifier;
pub use cycle::ReadCycle;
pub use decoder::{decode, encode_records, DecodeError, DecodedRecord, RecordAction, RecordWriter};
pub use error::{Result, WatchError};
pub use handle::DirectoryHandle;
pub use platform::{Completion, CompletionStatus, DirectoryReader};
pub use rename::{Change, RenameMatcher};
pub use watch_loop::{LoopState, WatchLoop, WatchOptions};

#[cfg(any(target_os = "linux", windows))]
pub use platform::NativeReader;
#[cfg(any(target_os = "linux", windows))]
pub use watch_loop::NativeWatchLoop;
