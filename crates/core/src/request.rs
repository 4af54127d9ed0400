//! Watch requests and the notification filter mask

use bitflags::bitflags;
use std::path::{Path, PathBuf};

/// Buffer size used when the request does not set one
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Largest buffer accepted; network shares reject anything above 64 KiB
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Errors building a [`WatchRequest`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("watch root must not be empty")]
    EmptyRoot,

    #[error("buffer size {size} exceeds the maximum of {max} bytes")]
    BufferTooLarge { size: usize, max: usize },

    #[error("unknown notify filter flag: {0}")]
    UnknownFilter(String),
}

bitflags! {
    /// Which kinds of change the OS should report
    ///
    /// Bit values match the Windows `FILE_NOTIFY_CHANGE_*` constants so the
    /// mask can be passed through unchanged on that platform.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct NotifyFilter: u32 {
        const FILE_NAME = 0x0001;
        const DIR_NAME = 0x0002;
        const ATTRIBUTES = 0x0004;
        const SIZE = 0x0008;
        const LAST_WRITE = 0x0010;
        const LAST_ACCESS = 0x0020;
        const CREATION = 0x0040;
        const SECURITY = 0x0100;
    }
}

const FLAG_NAMES: [(&str, NotifyFilter); 8] = [
    ("file_name", NotifyFilter::FILE_NAME),
    ("dir_name", NotifyFilter::DIR_NAME),
    ("attributes", NotifyFilter::ATTRIBUTES),
    ("size", NotifyFilter::SIZE),
    ("last_write", NotifyFilter::LAST_WRITE),
    ("last_access", NotifyFilter::LAST_ACCESS),
    ("creation", NotifyFilter::CREATION),
    ("security", NotifyFilter::SECURITY),
];

impl NotifyFilter {
    /// Look up a single flag by its config name (`"file_name"`, `"size"`, ...)
    pub fn from_config_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        FLAG_NAMES
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|(_, flag)| *flag)
    }

    /// Combine a list of flag names into one mask
    pub fn from_names<I, S>(names: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |acc, name| {
            let name = name.as_ref();
            Self::from_config_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| RequestError::UnknownFilter(name.to_string()))
        })
    }

    /// Config names of the flags set in this mask
    pub fn names(self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(n, _)| *n)
            .collect()
    }
}

impl Default for NotifyFilter {
    fn default() -> Self {
        Self::FILE_NAME | Self::DIR_NAME | Self::ATTRIBUTES | Self::SIZE | Self::LAST_WRITE
    }
}

/// Everything needed to start one watch; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    root: PathBuf,
    recursive: bool,
    filter: NotifyFilter,
    buffer_size: usize,
}

impl WatchRequest {
    /// Request for `root` with default settings
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RequestError> {
        Self::builder(root).build()
    }

    pub fn builder(root: impl Into<PathBuf>) -> WatchRequestBuilder {
        WatchRequestBuilder {
            root: root.into(),
            recursive: false,
            filter: NotifyFilter::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn filter(&self) -> NotifyFilter {
        self.filter
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Builder for [`WatchRequest`]
#[derive(Debug, Clone)]
pub struct WatchRequestBuilder {
    root: PathBuf,
    recursive: bool,
    filter: NotifyFilter,
    buffer_size: usize,
}

impl WatchRequestBuilder {
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn filter(mut self, filter: NotifyFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Size of the notification buffer in bytes
    ///
    /// Sizes too small to hold a single record are accepted here; the watch
    /// reports `CannotStart` when it tries to arm a read with them.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn build(self) -> Result<WatchRequest, RequestError> {
        if self.root.as_os_str().is_empty() {
            return Err(RequestError::EmptyRoot);
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(RequestError::BufferTooLarge {
                size: self.buffer_size,
                max: MAX_BUFFER_SIZE,
            });
        }

        Ok(WatchRequest {
            root: self.root,
            recursive: self.recursive,
            filter: self.filter,
            buffer_size: self.buffer_size,
        })
    }
}
