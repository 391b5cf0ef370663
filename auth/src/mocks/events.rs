//! Mock security event sink.

use crate::events::{SecurityEvent, SecurityEventSink};
use std::sync::{Arc, Mutex, PoisonError};

/// Sink that keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl RecordingEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events with the given [`SecurityEvent::name`].
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    /// Forget all events.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SecurityEventSink for RecordingEventSink {
    fn emit(&self, event: SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
