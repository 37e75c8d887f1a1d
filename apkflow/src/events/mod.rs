//! Event emission for run observability.
//!
//! The pipeline engine reports lifecycle transitions through an injected
//! [`EventSink`]. Event names:
//!
//! - `pipeline.started`, `pipeline.completed`, `pipeline.halted`, `pipeline.cancelled`
//! - `stage.started`, `stage.skipped`, `stage.retrying`, `stage.completed`, `stage.failed`

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};
