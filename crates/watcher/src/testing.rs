//! Scripted reader for exercising the completion protocol without an OS backend
//!
//! Each fake root path maps to a shared [`Script`]; tests queue completions
//! on it and inspect the counters afterwards.

use crate::buffer::NotificationBuffer;
use crate::platform::{Completion, DirectoryReader};
use dirwatch_core::NotifyFilter;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// What the next `wait` on a pending read returns
pub(crate) enum Step {
    /// Copy these record bytes into the buffer and complete successfully
    Records(Vec<u8>),
    /// Complete with this status and byte count as-is
    Complete(Completion),
}

pub(crate) struct Script {
    pub openable: bool,
    pub valid: bool,
    pub refuse_reads: bool,
    pub steps: VecDeque<Step>,
    pub cancel_requested: bool,
    pub opens: usize,
    pub reads_armed: usize,
    pub cancels: usize,
    pub closes: usize,
    pub last_filter: Option<(bool, NotifyFilter)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            openable: true,
            valid: true,
            refuse_reads: false,
            steps: VecDeque::new(),
            cancel_requested: false,
            opens: 0,
            reads_armed: 0,
            cancels: 0,
            closes: 0,
            last_filter: None,
        }
    }
}

fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<Script>>>> {
    static SCRIPTS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<Script>>>>> = OnceLock::new();
    SCRIPTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a fresh script for `root`, replacing any earlier one
pub(crate) fn install(root: impl Into<PathBuf>) -> Arc<Mutex<Script>> {
    let script = Arc::new(Mutex::new(Script::default()));
    registry().lock().insert(root.into(), script.clone());
    script
}

pub(crate) struct ScriptedReader {
    script: Arc<Mutex<Script>>,
    pending: bool,
    closed: bool,
}

impl DirectoryReader for ScriptedReader {
    fn open(root: &Path) -> io::Result<Self> {
        let script = registry()
            .lock()
            .get(root)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no script installed"))?;

        {
            let mut s = script.lock();
            if !s.openable {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "scripted denial"));
            }
            s.opens += 1;
        }

        Ok(Self {
            script,
            pending: false,
            closed: false,
        })
    }

    fn is_valid(&self) -> bool {
        !self.closed && self.script.lock().valid
    }

    unsafe fn begin_read(
        &mut self,
        _buffer: &mut NotificationBuffer,
        recursive: bool,
        filter: NotifyFilter,
    ) -> io::Result<()> {
        let mut s = self.script.lock();
        if s.refuse_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted refusal"));
        }
        s.reads_armed += 1;
        s.last_filter = Some((recursive, filter));
        self.pending = true;
        Ok(())
    }

    fn wait(&mut self, buffer: &mut NotificationBuffer, timeout: Duration) -> Option<Completion> {
        let step = if self.pending {
            let mut s = self.script.lock();
            if s.cancel_requested {
                s.cancel_requested = false;
                Some(Step::Complete(Completion::aborted()))
            } else {
                s.steps.pop_front()
            }
        } else {
            None
        };

        match step {
            Some(Step::Records(bytes)) => {
                let dest = buffer.as_mut_bytes();
                let len = bytes.len().min(dest.len());
                dest[..len].copy_from_slice(&bytes[..len]);
                self.pending = false;
                Some(Completion::success(len))
            }
            Some(Step::Complete(completion)) => {
                self.pending = false;
                Some(completion)
            }
            None => {
                thread::sleep(timeout.min(Duration::from_millis(5)));
                None
            }
        }
    }

    fn cancel(&mut self) {
        if self.pending {
            let mut s = self.script.lock();
            s.cancel_requested = true;
            s.cancels += 1;
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending = false;
            self.script.lock().closes += 1;
        }
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.close();
    }
}
