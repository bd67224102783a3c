//! Monitoring event log.
//!
//! Append-only structured record of everything a monitoring or recharge run
//! observed: samples, transitions, and errors. The log exists for post-hoc
//! diagnosis; the monitor never reads it back to make control decisions.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle markers recorded during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MonitorStarted,
    PageLoaded,
    NavigationFailed,
    PollTick,
    RedirectDetected,
    IframeRedirectDetected,
    ContentMatchDetected,
    SampleError,
    Classified,
    LateClassification,
    TimedOut,
    SessionLost,
    SessionReleased,
    Cancelled,
    FlowStepStarted,
    CaptchaSolved,
    PaymentUrlCaptured,
}

/// One diagnostic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "eventType")]
    pub kind: EventKind,
    pub payload: Value,
}

/// Append-only event log with an optional JSONL file sink.
///
/// Entries keep creation order and are never reordered or removed. With a
/// sink attached, each event is written and flushed at creation so the
/// on-disk record stays complete even if the process dies mid-run.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
    sink: Option<File>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that also appends each event to a JSONL file at `path`.
    pub fn with_sink(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            events: Vec::new(),
            sink: Some(file),
        })
    }

    /// Append an event.
    pub fn append(&mut self, kind: EventKind, payload: Value) {
        let event = Event {
            timestamp: Utc::now(),
            kind,
            payload,
        };
        if let Some(file) = &mut self.sink {
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
        self.events.push(event);
    }

    /// All events recorded so far, in creation order.
    pub fn summary(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Consume the log, returning the recorded events.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_preserves_order() {
        let mut log = EventLog::new();
        log.append(EventKind::MonitorStarted, json!({ "startUrl": "https://pay.example/x" }));
        log.append(EventKind::PollTick, json!({ "tick": 10 }));
        log.append(EventKind::TimedOut, json!({}));

        let events = log.summary();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::MonitorStarted);
        assert_eq!(events[1].kind, EventKind::PollTick);
        assert_eq!(events[2].kind, EventKind::TimedOut);
    }

    #[test]
    fn test_event_kind_serializes_snake_case() {
        let value = serde_json::to_value(EventKind::IframeRedirectDetected).unwrap();
        assert_eq!(value, json!("iframe_redirect_detected"));
    }

    #[test]
    fn test_sink_writes_one_line_per_event() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.jsonl");

        let mut log = EventLog::with_sink(&path).unwrap();
        log.append(EventKind::RedirectDetected, json!({ "to": "https://pay.example/ok" }));
        log.append(EventKind::Classified, json!({ "state": "success" }));

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Event = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, EventKind::RedirectDetected);
        assert_eq!(first.payload["to"], "https://pay.example/ok");
    }

    #[test]
    fn test_sink_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("dir").join("run.jsonl");

        let mut log = EventLog::with_sink(&path).unwrap();
        log.append(EventKind::MonitorStarted, json!({}));
        assert!(path.exists());
    }
}
