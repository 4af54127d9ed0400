//! Consumer boundary for watch output

use crate::event::{ErrorReport, Event, EventError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

/// Receives everything a watch produces
///
/// Both methods are called from the watch's worker thread while it is
/// handling a completion, so implementations should hand work off rather
/// than block.
pub trait EventSink: Send + Sync {
    /// A file-system entry changed
    fn on_event(&self, event: Event);

    /// The watch itself degraded
    fn on_error(&self, report: ErrorReport);
}

/// Sink forwarding into two unbounded crossbeam channels
///
/// A dropped receiver is not an error; the notification is discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    events: Sender<Event>,
    errors: Sender<ErrorReport>,
}

impl ChannelSink {
    /// Create the sink together with its event and error receivers
    pub fn new() -> (Self, Receiver<Event>, Receiver<ErrorReport>) {
        let (events, event_rx) = crossbeam_channel::unbounded();
        let (errors, error_rx) = crossbeam_channel::unbounded();
        (Self { events, errors }, event_rx, error_rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }

    fn on_error(&self, report: ErrorReport) {
        if self.errors.send(report).is_err() {
            trace!("Error receiver dropped, discarding {:?}", report.error);
        }
    }
}

/// Anything a sink can receive, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Event(Event),
    Error(ErrorReport),
}

/// Sink that records notifications in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    log: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, interleaved in arrival order
    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.log
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Event(e) => Some(e.clone()),
                Notification::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<EventError> {
        self.log
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Error(r) => Some(r.error),
                Notification::Event(_) => None,
            })
            .collect()
    }

    /// Drain and return everything received so far
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.log.lock())
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: Event) {
        self.log.lock().push(Notification::Event(event));
    }

    fn on_error(&self, report: ErrorReport) {
        self.log.lock().push(Notification::Error(report));
    }
}
