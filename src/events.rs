//! # Event Sink
//!
//! Outbound contract of the control core: human-readable log lines and
//! display-refresh notifications. The core never formats for a specific
//! backend; it hands lines to an [`EventSink`].

use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info};

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// Display area that needs a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisplayField {
    /// Power output states
    PowerStatus,
    /// Current transponder id
    Transponder,
}

/// Receiver of log lines and display notifications
pub trait EventSink: Send {
    /// Appends a line to the event log
    fn append_log(&mut self, severity: Severity, line: &str);

    /// Requests a refresh of a display area
    fn display_update(&mut self, field: DisplayField);

    /// Appends an info line
    fn log(&mut self, line: &str) {
        self.append_log(Severity::Info, line);
    }

    /// Appends an error line
    fn log_error(&mut self, line: &str) {
        self.append_log(Severity::Error, line);
    }
}

/// Forwards log lines to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn append_log(&mut self, severity: Severity, line: &str) {
        match severity {
            Severity::Info => info!("{}", line),
            Severity::Error => error!("{}", line),
        }
    }

    fn display_update(&mut self, field: DisplayField) {
        debug!("Display update: {:?}", field);
    }
}

/// Delivers every event to both sinks
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn append_log(&mut self, severity: Severity, line: &str) {
        self.0.append_log(severity, line);
        self.1.append_log(severity, line);
    }

    fn display_update(&mut self, field: DisplayField) {
        self.0.display_update(field);
        self.1.display_update(field);
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn append_log(&mut self, severity: Severity, line: &str) {
        (**self).append_log(severity, line);
    }

    fn display_update(&mut self, field: DisplayField) {
        (**self).display_update(field);
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Recorded sink event
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Recorded {
        Log(Severity, String),
        Display(DisplayField),
    }

    /// Sink recording all events for inspection
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub events: Arc<Mutex<Vec<Recorded>>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Recorded> {
            self.events.lock().unwrap().clone()
        }

        /// All log lines, regardless of severity
        pub fn lines(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Recorded::Log(_, line) => Some(line),
                    Recorded::Display(_) => None,
                })
                .collect()
        }

        /// Error lines only
        pub fn errors(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Recorded::Log(Severity::Error, line) => Some(line),
                    _ => None,
                })
                .collect()
        }

        pub fn displays(&self) -> Vec<DisplayField> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Recorded::Display(field) => Some(field),
                    Recorded::Log(..) => None,
                })
                .collect()
        }

        pub fn count_containing(&self, needle: &str) -> usize {
            self.lines().iter().filter(|l| l.contains(needle)).count()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl EventSink for RecordingSink {
        fn append_log(&mut self, severity: Severity, line: &str) {
            self.events
                .lock()
                .unwrap()
                .push(Recorded::Log(severity, line.to_string()));
        }

        fn display_update(&mut self, field: DisplayField) {
            self.events.lock().unwrap().push(Recorded::Display(field));
        }
    }
}
