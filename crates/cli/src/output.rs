//! Rendering events and error reports for the terminal

use chrono::{DateTime, Local, Utc};
use dirwatch_core::{EntryKind, ErrorReport, Event, EventAction};
use owo_colors::OwoColorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One aligned, optionally colored line per item
    Human,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
    color: bool,
}

impl Printer {
    pub fn new(format: OutputFormat, color: bool) -> Self {
        Self { format, color }
    }

    pub fn event_line(&self, event: &Event) -> String {
        match self.format {
            OutputFormat::Json => to_json(event),
            OutputFormat::Human => {
                let name = match &event.previous_name {
                    Some(previous) => format!("{} -> {}", previous, event.name),
                    None => event.name.clone(),
                };
                format!(
                    "{} [{}] {} {:<9} {}",
                    self.dim(&format_timestamp(event.timestamp_ms)),
                    event.id,
                    self.action(event.action),
                    entry_label(event.entry),
                    name
                )
            }
        }
    }

    pub fn error_line(&self, report: &ErrorReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Human => {
                let label = format!("{:<8}", "error");
                let label = if self.color {
                    label.red().bold().to_string()
                } else {
                    label
                };
                format!(
                    "{} [{}] {} {}",
                    self.dim(&format_timestamp(report.timestamp_ms)),
                    report.id,
                    label,
                    report.error
                )
            }
        }
    }

    fn action(&self, action: EventAction) -> String {
        let text = format!("{:<8}", action.to_string());
        if !self.color {
            return text;
        }
        match action {
            EventAction::Added => text.green().to_string(),
            EventAction::Removed => text.red().to_string(),
            EventAction::Touched => text.yellow().to_string(),
            EventAction::Renamed => text.cyan().to_string(),
            EventAction::Unknown => text.dimmed().to_string(),
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }
}

fn entry_label(entry: EntryKind) -> &'static str {
    match entry {
        EntryKind::File => "file",
        EntryKind::Directory => "directory",
        EntryKind::Unknown => "-",
    }
}

/// Local wall-clock time with milliseconds
pub fn format_timestamp(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|utc| utc.with_timezone(&Local).format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"serialize_error\":\"{}\"}}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirwatch_core::{EventError, MonitorId};

    fn plain() -> Printer {
        Printer::new(OutputFormat::Human, false)
    }

    #[test]
    fn test_human_event() {
        let event = Event::new(MonitorId(3), EventAction::Added, "src/main.rs", EntryKind::File);
        let line = plain().event_line(&event);
        assert!(line.contains("[3] added"));
        assert!(line.contains("file"));
        assert!(line.ends_with("src/main.rs"));
    }

    #[test]
    fn test_human_rename_shows_both_names() {
        let event = Event::renamed(MonitorId(1), "a.txt", "b.txt", EntryKind::Unknown);
        let line = plain().event_line(&event);
        assert!(line.contains("renamed"));
        assert!(line.ends_with("a.txt -> b.txt"));
    }

    #[test]
    fn test_human_error() {
        let report = ErrorReport::new(MonitorId(1), EventError::Overflow);
        let line = plain().error_line(&report);
        assert!(line.contains("error"));
        assert!(line.contains("changes were lost"));
    }

    #[test]
    fn test_json_lines_parse() {
        let printer = Printer::new(OutputFormat::Json, false);

        let event = Event::renamed(MonitorId(9), "old", "new", EntryKind::Directory);
        let value: serde_json::Value = serde_json::from_str(&printer.event_line(&event)).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["action"], "renamed");
        assert_eq!(value["previous_name"], "old");
        assert_eq!(value["entry"], "directory");

        let report = ErrorReport::new(MonitorId(9), EventError::Access);
        let value: serde_json::Value = serde_json::from_str(&printer.error_line(&report)).unwrap();
        assert_eq!(value["error"], "access");
    }

    #[test]
    fn test_colored_output_keeps_text() {
        let event = Event::new(MonitorId(1), EventAction::Removed, "gone", EntryKind::Unknown);
        let line = Printer::new(OutputFormat::Human, true).event_line(&event);
        assert!(line.contains("removed"));
        assert!(line.contains("gone"));
    }
}
