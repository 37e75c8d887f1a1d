//! Event sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receiver of pipeline lifecycle events.
///
/// The engine is handed a sink explicitly; there is no process-wide sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// * `event_type` - dotted event name, e.g. `stage.completed`
    /// * `data` - optional structured payload; stage events carry a `stage` field
    async fn emit(&self, event_type: &str, data: Option<Value>);
}

fn stage_of(data: Option<&Value>) -> Option<&str> {
    data?.get("stage")?.as_str()
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// A sink that forwards events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink. Levels other than `DEBUG` log at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Debug-level sink; the engine already logs transitions at `info`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        let stage = stage_of(data.as_ref()).unwrap_or("-");
        let payload = data.as_ref().map(ToString::to_string).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event = event_type, stage, payload = %payload, "Pipeline event");
        } else {
            info!(event = event_type, stage, payload = %payload, "Pipeline event");
        }
    }
}

/// One event kept by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// Event name.
    pub name: String,
    /// Payload as emitted.
    pub data: Option<Value>,
    /// Time of emission.
    pub at: DateTime<Utc>,
}

impl RecordedEvent {
    /// The `stage` field of the payload, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        stage_of(self.data.as_ref())
    }
}

/// A sink that keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Event names, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Names of the events emitted for one stage, in order.
    #[must_use]
    pub fn stage_events(&self, stage: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage() == Some(stage))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push(RecordedEvent {
            name: event_type.to_string(),
            data,
            at: Utc::now(),
        });
    }
}
