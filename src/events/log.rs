//! # Tracing-backed event logger (feature `logging`).
//!
//! [`EventLogger`] is a ready-made [`EventHandler`] that writes every
//! delivered event through `tracing`, mapping event priority to log level.
//! Subscribe it to the types you care about, usually in `FireAndForget`
//! mode, for development and demos.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::HandlerError;
use crate::events::{Event, EventHandler, EventPriority};

/// Logs delivered events via `tracing`.
pub struct EventLogger;

#[async_trait]
impl EventHandler for EventLogger {
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let event_type = event.event_type.as_ref();
        let source = event.source.as_ref();
        match event.priority {
            EventPriority::Critical => error!(event_type, source, id = event.id, "event"),
            EventPriority::High => warn!(event_type, source, id = event.id, "event"),
            EventPriority::Medium | EventPriority::Normal => {
                info!(event_type, source, id = event.id, "event")
            }
            EventPriority::Low => debug!(event_type, source, id = event.id, "event"),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "event_logger"
    }
}
