//! Event sinks.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::Level;

/// Receives build lifecycle events.
///
/// Event names are the constants in [`crate::events`]. Payloads carry at
/// least a `node` field for task events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Records an event. Sinks swallow their own failures.
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Records an event from synchronous code. Must not block or fail.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _: &str, _: Option<Value>) {}

    fn try_emit(&self, _: &str, _: Option<Value>) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink {
    verbose: bool,
}

impl LoggingEventSink {
    /// Logs at `DEBUG` when `level` is `DEBUG` or finer, `INFO` otherwise.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            verbose: level >= Level::DEBUG,
        }
    }

    /// Shorthand for a sink logging at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self { verbose: true }
    }

    fn record(self, event_type: &str, data: Option<&Value>) {
        let payload = data.map(Value::to_string).unwrap_or_default();
        if self.verbose {
            tracing::debug!(event = event_type, %payload, "build event");
        } else {
            tracing::info!(event = event_type, %payload, "build event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.record(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.record(event_type, data.as_ref());
    }
}

/// One event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedEvent {
    /// Event name.
    pub event_type: String,
    /// Payload, if any.
    pub data: Option<Value>,
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    log: Mutex<Vec<CollectedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every event collected so far.
    #[must_use]
    pub fn events(&self) -> Vec<CollectedEvent> {
        self.log.lock().clone()
    }

    /// Number of events collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Payloads of every event with this exact name.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<Option<Value>> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .map(|e| e.data.clone())
            .collect()
    }

    /// The `node` field of every event with this name, in arrival order.
    #[must_use]
    pub fn nodes_for(&self, event_type: &str) -> Vec<String> {
        self.events_of_type(event_type)
            .iter()
            .filter_map(|data| data.as_ref()?.get("node")?.as_str().map(str::to_owned))
            .collect()
    }

    fn push(&self, event_type: &str, data: Option<Value>) {
        self.log.lock().push(CollectedEvent {
            event_type: event_type.to_owned(),
            data,
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }
}
