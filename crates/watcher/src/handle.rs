//! Ownership of the OS handle for a watched directory

use crate::platform::DirectoryReader;
use dirwatch_core::EventError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory handle that can be validated, released and reopened
pub struct DirectoryHandle<R> {
    root: PathBuf,
    reader: Option<R>,
}

impl<R: DirectoryReader> DirectoryHandle<R> {
    /// Handle for `root`, not opened yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reader: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the directory; a no-op if the current handle is still valid
    ///
    /// A stale handle is released before reopening. Any failure (missing
    /// directory, permission denied) is `EventError::Access`.
    pub fn open(&mut self) -> Result<(), EventError> {
        if self.is_valid() {
            return Ok(());
        }
        self.release();

        match R::open(&self.root) {
            Ok(reader) => {
                debug!("Opened directory handle for {}", self.root.display());
                self.reader = Some(reader);
                Ok(())
            }
            Err(e) => {
                warn!("Cannot open {}: {}", self.root.display(), e);
                Err(EventError::Access)
            }
        }
    }

    /// False when unset, closed by the OS, or the root is gone
    pub fn is_valid(&self) -> bool {
        self.reader.as_ref().is_some_and(R::is_valid)
    }

    pub fn reader_mut(&mut self) -> Option<&mut R> {
        self.reader.as_mut()
    }

    /// Close the handle; safe to call any number of times
    pub fn release(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
            debug!("Released directory handle for {}", self.root.display());
        }
    }
}
