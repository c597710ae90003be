//! Human-readable console output stage.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::SecondsFormat;

use crate::event::{Level, LogEvent};
use crate::pipeline::Stage;

/// Prints one line per event to stdout and passes the event through.
///
/// ```text
/// 2024-04-05T17:02:41Z [WARN] primary unreachable region=eu-1 attempt=2
/// ```
pub struct ConsoleAppender {
    emitted: AtomicU64,
}

impl ConsoleAppender {
    pub fn new() -> Self {
        Self {
            emitted: AtomicU64::new(0),
        }
    }

    /// Events printed so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for ConsoleAppender {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ConsoleAppender {
    type Input = LogEvent;
    type Output = LogEvent;

    fn process(&self, event: LogEvent) -> Option<LogEvent> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", format_line(&event)).ok();
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }
}

fn label(level: Level) -> &'static str {
    match level {
        Level::Fatal => "[FATAL]",
        Level::Error => "[ERR]",
        Level::Warn => "[WARN]",
        Level::Info => "[INFO]",
        Level::Debug => "[DEBUG]",
    }
}

fn format_line(event: &LogEvent) -> String {
    let mut line = format!(
        "{} {} {}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        label(event.level),
        event.short_message
    );
    for (name, value) in &event.fields {
        line.push(' ');
        line.push_str(name);
        line.push('=');
        line.push_str(&value.to_string());
    }
    line
}
