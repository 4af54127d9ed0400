//! Configuration file and command-line overrides
//!
//! ```toml
//! [watch]
//! root = "/srv/incoming"
//! recursive = true
//! buffer_size = 32768
//! filter = ["file_name", "dir_name", "last_write"]
//!
//! [runtime]
//! sleep_interval_ms = 100
//! revalidate_interval_ms = 5000
//! abort_timeout_ms = 15000
//! ```

use dirwatch_core::{NotifyFilter, RequestError, WatchRequest, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use watcher::WatchOptions;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "dirwatch.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no directory to watch: pass one on the command line or set watch.root")]
    MissingRoot,

    #[error("runtime.{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error(transparent)]
    Request(#[from] RequestError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub watch: WatchConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub root: Option<PathBuf>,
    pub recursive: bool,
    pub buffer_size: usize,

    /// Notify filter flag names; the default set when absent
    pub filter: Option<Vec<String>>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: None,
            recursive: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub sleep_interval_ms: u64,
    pub revalidate_interval_ms: u64,
    pub abort_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let options = WatchOptions::default();
        Self {
            sleep_interval_ms: options.sleep_interval.as_millis() as u64,
            revalidate_interval_ms: options.revalidate_interval.as_millis() as u64,
            abort_timeout_ms: options.abort_timeout.as_millis() as u64,
        }
    }
}

/// Values given on the command line; each one set replaces the file's
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub recursive: bool,
    pub buffer_size: Option<usize>,
    pub filter: Option<Vec<String>>,
}

impl Config {
    /// Read and parse a config file; no validation beyond TOML shape
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given, else the default file if it exists, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::load(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(root) = &overrides.root {
            self.watch.root = Some(root.clone());
        }
        if overrides.recursive {
            self.watch.recursive = true;
        }
        if let Some(size) = overrides.buffer_size {
            self.watch.buffer_size = size;
        }
        if let Some(filter) = &overrides.filter {
            self.watch.filter = Some(filter.clone());
        }
    }

    pub fn filter(&self) -> Result<NotifyFilter, ConfigError> {
        match &self.watch.filter {
            Some(names) => Ok(NotifyFilter::from_names(names)?),
            None => Ok(NotifyFilter::default()),
        }
    }

    /// Validated watch request
    pub fn watch_request(&self) -> Result<WatchRequest, ConfigError> {
        let root = self.watch.root.clone().ok_or(ConfigError::MissingRoot)?;
        let request = WatchRequest::builder(root)
            .recursive(self.watch.recursive)
            .filter(self.filter()?)
            .buffer_size(self.watch.buffer_size)
            .build()?;
        Ok(request)
    }

    /// Validated worker timings
    pub fn watch_options(&self) -> Result<WatchOptions, ConfigError> {
        let runtime = &self.runtime;
        let nonzero = |value: u64, name: &'static str| {
            if value == 0 {
                Err(ConfigError::ZeroInterval(name))
            } else {
                Ok(Duration::from_millis(value))
            }
        };

        Ok(WatchOptions {
            sleep_interval: nonzero(runtime.sleep_interval_ms, "sleep_interval_ms")?,
            revalidate_interval: nonzero(runtime.revalidate_interval_ms, "revalidate_interval_ms")?,
            abort_timeout: nonzero(runtime.abort_timeout_ms, "abort_timeout_ms")?,
            ..WatchOptions::default()
        })
    }
}
