//! File vs. directory probing for reported names

use dirwatch_core::EntryKind;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Resolves names relative to a watch root to their current entry type
#[derive(Debug, Clone)]
pub struct PathClassifier {
    root: PathBuf,
}

impl PathClassifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Probe `name` now; never fails
    ///
    /// Symlinks are followed. An entry that is already gone (deleted or
    /// renamed away before we looked) or cannot be probed is `Unknown`.
    pub fn classify(&self, name: &str) -> EntryKind {
        let path = self.root.join(name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => EntryKind::Directory,
            Ok(meta) if meta.is_file() => EntryKind::File,
            Ok(_) => EntryKind::Unknown,
            Err(e) => {
                trace!("Could not probe {}: {}", path.display(), e);
                EntryKind::Unknown
            }
        }
    }

    /// True only if `name` currently resolves to a regular file
    pub fn is_file(&self, name: &str) -> bool {
        self.classify(name) == EntryKind::File
    }
}
