//! Shared helpers for watcher integration tests

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use dirwatch_core::Event;
use std::sync::Once;
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Route tracing output through the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Receive events until one matches `predicate` or `timeout` passes
///
/// Non-matching events (extra modifications the OS reports around a write)
/// are skipped.
pub fn expect_event(
    events: &Receiver<Event>,
    timeout: Duration,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Option<Event> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(event) => tracing::debug!("skipping {:?}", event),
            Err(_) => return None,
        }
    }
}

/// Collect whatever arrives within `window`
pub fn drain_for(events: &Receiver<Event>, window: Duration) -> Vec<Event> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) => seen.push(event),
            Err(_) => break,
        }
    }
    seen
}
