//! Pipeline event types and the broadcast event bus
//!
//! Every job stage transition and stage summary is emitted here. The HTTP surface
//! streams these events over SSE; nothing in the pipeline depends on a listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a thesis job runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Job accepted and waiting for a scheduler slot
    JobQueued {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Job moved to another pipeline stage
    JobStageChanged {
        job_id: Uuid,
        old_state: String,
        new_state: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress inside a stage (documents acquired, sections written, ...)
    StageProgress {
        job_id: Uuid,
        stage: String,
        current: usize,
        total: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Job finished with a document (possibly with warnings)
    JobCompleted {
        job_id: Uuid,
        word_count: usize,
        warnings: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job aborted by a fatal pipeline error
    JobFailed {
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobQueued { .. } => "JobQueued",
            PipelineEvent::JobStageChanged { .. } => "JobStageChanged",
            PipelineEvent::StageProgress { .. } => "StageProgress",
            PipelineEvent::JobCompleted { .. } => "JobCompleted",
            PipelineEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            PipelineEvent::JobQueued { job_id, .. }
            | PipelineEvent::JobStageChanged { job_id, .. }
            | PipelineEvent::StageProgress { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; returns the number of subscribers that received it
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the case where nobody is listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(PipelineEvent::JobQueued {
            job_id,
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), job_id);
        assert_eq!(event.event_type(), "JobQueued");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus
            .emit(PipelineEvent::JobFailed {
                job_id: Uuid::new_v4(),
                error: "boom".into(),
                timestamp: Utc::now(),
            })
            .is_err());

        // Lossy emit never fails
        bus.emit_lossy(PipelineEvent::JobFailed {
            job_id: Uuid::new_v4(),
            error: "boom".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::StageProgress {
            job_id: Uuid::nil(),
            stage: "ACQUIRING".into(),
            current: 2,
            total: 5,
            message: "2/5 documents".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StageProgress");
        assert_eq!(json["current"], 2);
    }
}
