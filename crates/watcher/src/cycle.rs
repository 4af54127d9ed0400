//! The read/complete/re-arm cycle for one watched directory
//!
//! Completion handling follows one rule set:
//!
//! - aborted: report `Aborted`, do not re-arm
//! - zero bytes: the kernel buffer overflowed; report `Overflow` and re-arm
//! - data: copy it out, re-arm, then decode the copy
//! - any other OS error: report `Access` and leave the handle for revalidation
//!
//! Re-arming before decoding keeps the window in which the kernel has nowhere
//! to put new changes as short as possible. The copy is what makes that safe:
//! the OS may start writing the next batch into the live buffer immediately.

use crate::buffer::{NotificationBuffer, MIN_RECORD_SIZE};
use crate::classify::PathClassifier;
use crate::decoder::decode;
use crate::handle::DirectoryHandle;
use crate::platform::{Completion, CompletionStatus, DirectoryReader};
use crate::rename::{Change, RenameMatcher};
use dirwatch_core::{ErrorReport, Event, EventAction, EventError, EventSink, MonitorId, WatchRequest};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Poll step while draining the aborted completion on shutdown
const ABORT_POLL: Duration = Duration::from_millis(50);

/// One directory's handle, buffer and completion state
pub struct ReadCycle<R: DirectoryReader> {
    id: MonitorId,
    request: WatchRequest,
    handle: DirectoryHandle<R>,
    buffer: NotificationBuffer,
    classifier: PathClassifier,
    sink: Arc<dyn EventSink>,

    /// A read is armed and its completion has not been handled yet
    pending: bool,

    /// The last read failed with an OS error; reopen on the next revalidation
    needs_reopen: bool,

    /// `Access` was reported for the current outage
    access_reported: bool,

    /// Shutting down: completions are still handled but never re-armed
    stopping: bool,
}

impl<R: DirectoryReader> ReadCycle<R> {
    pub fn new(id: MonitorId, request: WatchRequest, sink: Arc<dyn EventSink>) -> Self {
        Self {
            id,
            handle: DirectoryHandle::new(request.root()),
            buffer: NotificationBuffer::new(request.buffer_size()),
            classifier: PathClassifier::new(request.root()),
            request,
            sink,
            pending: false,
            needs_reopen: false,
            access_reported: false,
            stopping: false,
        }
    }

    pub fn id(&self) -> MonitorId {
        self.id
    }

    pub fn request(&self) -> &WatchRequest {
        &self.request
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Open the directory and prepare the buffer
    ///
    /// Failure is reported to the sink as `Access` and returned.
    pub fn open(&mut self) -> Result<(), EventError> {
        if let Err(e) = self.handle.open() {
            self.report_access();
            return Err(e);
        }
        self.buffer.prepare();
        self.needs_reopen = false;
        self.access_reported = false;
        Ok(())
    }

    /// Arm the next read
    ///
    /// Returns false, reporting `CannotStart`, if the handle is invalid, the
    /// buffer cannot hold a single record, or the OS refuses the read. Does
    /// nothing while stopping, and is a no-op success while a read is pending.
    pub fn issue_read(&mut self) -> bool {
        if self.stopping {
            return false;
        }
        if self.pending {
            return true;
        }

        if !self.handle.is_valid() {
            debug!("Cannot arm read on {}: handle is not valid", self.request.root().display());
            self.report(EventError::CannotStart);
            return false;
        }
        if self.buffer.capacity() < MIN_RECORD_SIZE {
            warn!(
                "Cannot arm read on {}: {}-byte buffer is too small for a record",
                self.request.root().display(),
                self.buffer.capacity()
            );
            self.report(EventError::CannotStart);
            return false;
        }

        let recursive = self.request.recursive();
        let filter = self.request.filter();
        let Some(reader) = self.handle.reader_mut() else {
            self.report(EventError::CannotStart);
            return false;
        };

        // SAFETY: the buffer is owned by this cycle and is only prepared,
        // cleared or read again after the completion for this read has been
        // returned by `wait`, or after the handle has been released.
        match unsafe { reader.begin_read(&mut self.buffer, recursive, filter) } {
            Ok(()) => {
                self.pending = true;
                trace!("Armed read on {}", self.request.root().display());
                true
            }
            Err(e) => {
                warn!("OS refused read on {}: {}", self.request.root().display(), e);
                self.report(EventError::CannotStart);
                false
            }
        }
    }

    /// Wait up to `timeout` for a completion and handle it
    ///
    /// Returns true if a completion was handled.
    pub fn service(&mut self, timeout: Duration) -> bool {
        let completion = match self.handle.reader_mut() {
            Some(reader) => reader.wait(&mut self.buffer, timeout),
            None => {
                thread::sleep(timeout);
                None
            }
        };

        match completion {
            Some(completion) => {
                self.on_completion(completion);
                true
            }
            None => false,
        }
    }

    /// Apply the completion rules to one finished read
    pub fn on_completion(&mut self, completion: Completion) {
        self.pending = false;

        match completion.status {
            CompletionStatus::Aborted => {
                debug!("Read on {} aborted", self.request.root().display());
                self.report(EventError::Aborted);
            }
            CompletionStatus::Failed(code) => {
                warn!(
                    "Read on {} failed with OS error {}",
                    self.request.root().display(),
                    code
                );
                self.needs_reopen = true;
                self.report_access();
            }
            CompletionStatus::Success if completion.bytes == 0 => {
                warn!(
                    "Notification buffer for {} overflowed, changes were lost",
                    self.request.root().display()
                );
                self.report(EventError::Overflow);
                self.issue_read();
            }
            CompletionStatus::Success => {
                let data = match self.buffer.clone_bytes(completion.bytes) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Dropping {}-byte completion: {}", completion.bytes, e);
                        self.report(EventError::Memory);
                        self.issue_read();
                        return;
                    }
                };

                self.issue_read();
                self.process(data);
            }
        }
    }

    /// Decode a copied buffer and deliver its events
    ///
    /// The copy is consumed; it is freed when this returns, whatever happened.
    pub fn process(&self, data: Vec<u8>) {
        let mut delivered = 0usize;

        for change in RenameMatcher::new(decode(&data)) {
            match change {
                Ok(change) => {
                    self.sink.on_event(self.to_event(change));
                    delivered += 1;
                }
                Err(e) => {
                    warn!("Skipping malformed notification record: {}", e);
                    self.report(EventError::Memory);
                }
            }
        }

        trace!("Delivered {} event(s) from {} bytes", delivered, data.len());
    }

    fn to_event(&self, change: Change) -> Event {
        let entry = self.classifier.classify(change.name());
        match change {
            Change::Added(name) => Event::new(self.id, EventAction::Added, name, entry),
            Change::Removed(name) => Event::new(self.id, EventAction::Removed, name, entry),
            Change::Touched(name) => Event::new(self.id, EventAction::Touched, name, entry),
            Change::Unknown(name) => Event::new(self.id, EventAction::Unknown, name, entry),
            Change::Renamed { old, new } => Event::renamed(self.id, old, new, entry),
        }
    }

    /// Periodic health check of the handle
    ///
    /// A valid handle with no read armed (after a refused or aborted read) is
    /// re-armed. A lost handle is released and reopened once the root is back.
    pub fn revalidate(&mut self) {
        if self.stopping {
            return;
        }

        if self.handle.is_valid() && !self.needs_reopen {
            if !self.pending {
                self.issue_read();
            }
            return;
        }

        self.report_access();
        self.handle.release();
        self.pending = false;

        match self.handle.open() {
            Ok(()) => {
                info!("Reopened {}", self.request.root().display());
                self.buffer.prepare();
                self.needs_reopen = false;
                self.access_reported = false;
                self.issue_read();
            }
            Err(_) => debug!("{} is still unavailable", self.request.root().display()),
        }
    }

    /// Cancel the pending read and wait for its aborted completion, then
    /// release the handle
    ///
    /// Runs on the thread that armed the reads, since that is where their
    /// completions are delivered.
    pub fn shutdown(&mut self, abort_timeout: Duration) {
        self.stopping = true;

        if self.pending {
            if let Some(reader) = self.handle.reader_mut() {
                reader.cancel();
            }

            let deadline = Instant::now() + abort_timeout;
            while self.pending {
                let now = Instant::now();
                if now >= deadline {
                    warn!(
                        "Timed out waiting for the aborted read on {}",
                        self.request.root().display()
                    );
                    break;
                }
                self.service(ABORT_POLL.min(deadline - now));
            }
        }

        self.handle.release();
        self.pending = false;
    }

    /// Release everything; safe after `shutdown` or on a cycle that never ran
    pub fn teardown(&mut self) {
        self.handle.release();
        self.buffer.clear();
        self.pending = false;
    }

    fn report(&self, error: EventError) {
        self.sink.on_error(ErrorReport::new(self.id, error));
    }

    /// `Access` is reported once per outage
    fn report_access(&mut self) {
        if !self.access_reported {
            self.access_reported = true;
            self.report(EventError::Access);
        }
    }
}
