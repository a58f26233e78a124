//! Event types and in-process event bus
//!
//! Pipeline progress is broadcast on a `tokio::sync::broadcast` channel and
//! fanned out to SSE clients. Emission never blocks the pipeline; if nobody is
//! listening the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the ingestion and compliance pipelines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ReviewEvent {
    /// Standard-set ingest began
    StandardSetIngestStarted {
        standard_set_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Standard-set ingest committed its standards
    StandardSetIngestCompleted {
        standard_set_id: Uuid,
        name: String,
        standards_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Standard-set ingest failed and was rolled back
    StandardSetIngestFailed {
        standard_set_id: Uuid,
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Code review moved to a new status
    CodeReviewStatusChanged {
        review_id: Uuid,
        old_status: String,
        new_status: String,
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A compliance report was appended to a code review
    ComplianceReportAdded {
        review_id: Uuid,
        report_id: Uuid,
        standard_set_name: String,
        timestamp: DateTime<Utc>,
    },
}

impl ReviewEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ReviewEvent::StandardSetIngestStarted { .. } => "StandardSetIngestStarted",
            ReviewEvent::StandardSetIngestCompleted { .. } => "StandardSetIngestCompleted",
            ReviewEvent::StandardSetIngestFailed { .. } => "StandardSetIngestFailed",
            ReviewEvent::CodeReviewStatusChanged { .. } => "CodeReviewStatusChanged",
            ReviewEvent::ComplianceReportAdded { .. } => "ComplianceReportAdded",
        }
    }
}

/// Central event distribution bus
///
/// Clones share the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReviewEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReviewEvent,
    ) -> Result<usize, broadcast::error::SendError<ReviewEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReviewEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
