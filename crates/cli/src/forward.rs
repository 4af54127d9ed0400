//! Draining a watch's channels to an output stream

use crate::output::Printer;
use crossbeam_channel::{select, Receiver};
use dirwatch_core::{ErrorReport, Event};
use std::io::{self, Write};

/// Counts of what was written
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Forwarded {
    pub events: usize,
    pub errors: usize,
}

/// Write every event and error report to `out` until the watch's sink is
/// dropped
///
/// Blocks; run it on a blocking task. Returns early if `out` fails, e.g. on
/// a closed pipe.
pub fn forward<W: Write>(
    events: Receiver<Event>,
    errors: Receiver<ErrorReport>,
    printer: Printer,
    out: &mut W,
) -> io::Result<Forwarded> {
    let mut count = Forwarded::default();

    loop {
        select! {
            recv(events) -> msg => match msg {
                Ok(event) => {
                    writeln!(out, "{}", printer.event_line(&event))?;
                    count.events += 1;
                }
                Err(_) => break,
            },
            recv(errors) -> msg => match msg {
                Ok(report) => {
                    writeln!(out, "{}", printer.error_line(&report))?;
                    count.errors += 1;
                }
                Err(_) => break,
            },
        }
        out.flush()?;
    }

    // One side disconnected; the other shares the same sink, so whatever is
    // left in it is final
    for event in events.try_iter() {
        writeln!(out, "{}", printer.event_line(&event))?;
        count.events += 1;
    }
    for report in errors.try_iter() {
        writeln!(out, "{}", printer.error_line(&report))?;
        count.errors += 1;
    }
    out.flush()?;

    Ok(count)
}
