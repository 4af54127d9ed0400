//! Worker thread driving one [`ReadCycle`]
//!
//! Every read for a watch is armed, completed and cancelled on the same
//! dedicated thread, since completions are only delivered to the thread that
//! issued the read. Callers interact with the watch through [`WatchLoop`],
//! whose `start` and `stop` are idempotent.

use crate::cycle::ReadCycle;
use crate::error::{Result, WatchError};
use crate::platform::DirectoryReader;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use dirwatch_core::{EventSink, MonitorId, WatchRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(any(target_os = "linux", windows))]
use crate::platform::NativeReader;

/// Timing knobs for the worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Longest alertable wait per iteration
    pub sleep_interval: Duration,

    /// How often the directory handle is checked and reopened if lost
    pub revalidate_interval: Duration,

    /// Upper bound on waiting for the cancelled read while stopping
    pub abort_timeout: Duration,

    /// How long each iteration waits for a stop request
    pub cancel_poll: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_millis(100),
            revalidate_interval: Duration::from_secs(5),
            abort_timeout: Duration::from_secs(15),
            cancel_poll: Duration::from_millis(1),
        }
    }
}

/// Lifecycle of a [`WatchLoop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct Worker<R: DirectoryReader> {
    stop_tx: Sender<()>,
    thread: JoinHandle<ReadCycle<R>>,
}

struct Inner<R: DirectoryReader> {
    state: LoopState,
    worker: Option<Worker<R>>,
}

/// One watched directory and the thread servicing it
pub struct WatchLoop<R: DirectoryReader> {
    id: MonitorId,
    request: WatchRequest,
    sink: Arc<dyn EventSink>,
    options: WatchOptions,
    inner: Mutex<Inner<R>>,
}

/// Watch loop backed by this platform's notification API
#[cfg(any(target_os = "linux", windows))]
pub type NativeWatchLoop = WatchLoop<NativeReader>;

impl<R: DirectoryReader> WatchLoop<R> {
    pub fn new(id: MonitorId, request: WatchRequest, sink: Arc<dyn EventSink>) -> Self {
        Self::with_options(id, request, sink, WatchOptions::default())
    }

    pub fn with_options(
        id: MonitorId,
        request: WatchRequest,
        sink: Arc<dyn EventSink>,
        options: WatchOptions,
    ) -> Self {
        Self {
            id,
            request,
            sink,
            options,
            inner: Mutex::new(Inner {
                state: LoopState::Idle,
                worker: None,
            }),
        }
    }

    pub fn id(&self) -> MonitorId {
        self.id
    }

    pub fn request(&self) -> &WatchRequest {
        &self.request
    }

    pub fn state(&self) -> LoopState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Open the root and start the worker thread
    ///
    /// Does nothing if already running. Fails with [`WatchError::Access`]
    /// (after reporting `Access` to the sink) if the root cannot be opened.
    /// A first read the OS refuses is reported as `CannotStart` and retried
    /// on the next revalidation, so it does not fail the start.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == LoopState::Running {
            debug!("Watch {} already running", self.id);
            return Ok(());
        }
        inner.state = LoopState::Starting;

        let mut cycle = ReadCycle::<R>::new(self.id, self.request.clone(), self.sink.clone());
        if cycle.open().is_err() {
            inner.state = LoopState::Idle;
            return Err(WatchError::Access {
                path: self.request.root().to_path_buf(),
            });
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<bool>(1);
        let options = self.options;

        let spawned = thread::Builder::new()
            .name(format!("dirwatch-{}", self.id))
            .spawn(move || {
                let armed = cycle.issue_read();
                let _ = ready_tx.send(armed);

                let mut last_check = Instant::now();
                loop {
                    match stop_rx.recv_timeout(options.cancel_poll) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    cycle.service(options.sleep_interval);

                    if last_check.elapsed() >= options.revalidate_interval {
                        cycle.revalidate();
                        last_check = Instant::now();
                    }
                }

                cycle.shutdown(options.abort_timeout);
                cycle
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                inner.state = LoopState::Idle;
                return Err(WatchError::Spawn(e));
            }
        };

        match ready_rx.recv() {
            Ok(armed) => {
                if !armed {
                    warn!("Watch {} started without an armed read; will retry", self.id);
                }
            }
            Err(_) => {
                inner.state = LoopState::Idle;
                let _ = thread.join();
                return Err(WatchError::WorkerExited);
            }
        }

        inner.worker = Some(Worker { stop_tx, thread });
        inner.state = LoopState::Running;
        info!("Watching {} as {}", self.request.root().display(), self.id);
        Ok(())
    }

    /// Stop the worker and release the handle
    ///
    /// Returns false if the watch was not running.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(worker) = inner.worker.take() else {
            return false;
        };
        inner.state = LoopState::Stopping;

        let _ = worker.stop_tx.send(());
        match worker.thread.join() {
            Ok(mut cycle) => cycle.teardown(),
            Err(_) => warn!("Watch {} worker panicked", self.id),
        }

        inner.state = LoopState::Idle;
        info!("Stopped watching {}", self.request.root().display());
        true
    }
}

impl<R: DirectoryReader> Drop for WatchLoop<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{encode_records, RecordAction};
    use crate::testing::{install, ScriptedReader, Step};
    use dirwatch_core::{EventAction, EventError, MemorySink};

    fn fast_options() -> WatchOptions {
        WatchOptions {
            sleep_interval: Duration::from_millis(5),
            revalidate_interval: Duration::from_millis(50),
            abort_timeout: Duration::from_secs(1),
            cancel_poll: Duration::from_millis(1),
        }
    }

    fn loop_for(root: &str, sink: Arc<MemorySink>) -> WatchLoop<ScriptedReader> {
        let request = WatchRequest::new(root).unwrap();
        WatchLoop::with_options(MonitorId(7), request, sink, fast_options())
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let script = install("/scripted/loop-idempotent");
        let sink = Arc::new(MemorySink::new());
        let watch = loop_for("/scripted/loop-idempotent", sink.clone());

        watch.start().unwrap();
        watch.start().unwrap();
        assert!(watch.is_running());
        assert_eq!(script.lock().opens, 1);

        assert!(watch.stop());
        assert!(!watch.stop());
        assert_eq!(watch.state(), LoopState::Idle);
        assert_eq!(script.lock().closes, 1);
        assert_eq!(sink.errors(), vec![EventError::Aborted]);
    }

    #[test]
    fn test_start_failure_reports_access() {
        let script = install("/scripted/loop-denied");
        script.lock().openable = false;
        let sink = Arc::new(MemorySink::new());
        let watch = loop_for("/scripted/loop-denied", sink.clone());

        let err = watch.start().unwrap_err();
        assert!(matches!(err, WatchError::Access { .. }));
        assert_eq!(watch.state(), LoopState::Idle);
        assert_eq!(sink.errors(), vec![EventError::Access]);
        assert!(!watch.stop());
    }

    #[test]
    fn test_events_flow_to_sink() {
        let script = install("/scripted/loop-events");
        script.lock().steps.push_back(Step::Records(encode_records([
            (RecordAction::Added, "a.txt"),
            (RecordAction::RenamedOld, "a.txt"),
            (RecordAction::RenamedNew, "b.txt"),
        ])));
        let sink = Arc::new(MemorySink::new());
        let watch = loop_for("/scripted/loop-events", sink.clone());

        watch.start().unwrap();
        assert!(wait_until(|| sink.events().len() >= 2));
        watch.stop();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Added);
        assert_eq!(events[1].action, EventAction::Renamed);
        assert_eq!(events[1].previous_name.as_deref(), Some("a.txt"));
        assert!(events.iter().all(|e| e.id == MonitorId(7)));
        // First read plus the re-arm after the delivery
        assert_eq!(script.lock().reads_armed, 2);
    }

    #[test]
    fn test_refused_first_read_is_retried() {
        let script = install("/scripted/loop-retry");
        script.lock().refuse_reads = true;
        let sink = Arc::new(MemorySink::new());
        let watch = loop_for("/scripted/loop-retry", sink.clone());

        watch.start().unwrap();
        assert_eq!(sink.errors(), vec![EventError::CannotStart]);

        script.lock().refuse_reads = false;
        assert!(wait_until(|| script.lock().reads_armed == 1));
        watch.stop();
    }

    #[test]
    fn test_restart_reopens() {
        let script = install("/scripted/loop-restart");
        let sink = Arc::new(MemorySink::new());
        let watch = loop_for("/scripted/loop-restart", sink);

        watch.start().unwrap();
        watch.stop();
        watch.start().unwrap();
        watch.stop();

        let s = script.lock();
        assert_eq!(s.opens, 2);
        assert_eq!(s.closes, 2);
    }

    #[test]
    fn test_drop_stops_worker() {
        let script = install("/scripted/loop-drop");
        let sink = Arc::new(MemorySink::new());
        {
            let watch = loop_for("/scripted/loop-drop", sink);
            watch.start().unwrap();
        }
        assert_eq!(script.lock().closes, 1);
    }
}
