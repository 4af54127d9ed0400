//! Shared types for dirwatch
//!
//! - [`WatchRequest`] and [`NotifyFilter`]: what to watch and which changes to report
//! - [`Event`] and [`ErrorReport`]: what a watch produces
//! - [`EventSink`]: where it goes

pub mod event;
pub mod request;
pub mod sink;

pub use event::{current_timestamp_ms, EntryKind, ErrorReport, Event, EventAction, EventError, MonitorId};
pub use request::{
    NotifyFilter, RequestError, WatchRequest, WatchRequestBuilder, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE,
};
pub use sink::{ChannelSink, EventSink, MemorySink, Notification};
