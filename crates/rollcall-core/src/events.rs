//! Typed notifications between components.
//!
//! Producers publish on an [`EventBus`]; views and caches subscribe instead of
//! being called directly.

use crate::types::AttendanceRecord;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum RollEvent {
    EnrollmentCompleted { key: String },
    SamplesReplaced { key: String },
    ModelTrained { subjects: usize, samples: usize },
    AttendanceRecorded(AttendanceRecord),
    SubjectDeleted { key: String, attendance_removed: usize },
}

/// Clone-safe broadcast handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RollEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RollEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: RollEvent) {
        tracing::debug!(?event, "event published");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
