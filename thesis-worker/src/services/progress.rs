//! Stage progress broadcasting

use chrono::Utc;
use thesis_common::events::{EventBus, PipelineEvent};
use uuid::Uuid;

/// Emits `StageProgress` events for one job
///
/// Stages hold an `Option<ProgressReporter>`; unit tests run without one.
#[derive(Clone)]
pub struct ProgressReporter {
    event_bus: EventBus,
    job_id: Uuid,
}

impl ProgressReporter {
    pub fn new(event_bus: EventBus, job_id: Uuid) -> Self {
        Self { event_bus, job_id }
    }

    pub fn report(&self, stage: &str, current: usize, total: usize, message: impl Into<String>) {
        self.event_bus.emit_lossy(PipelineEvent::StageProgress {
            job_id: self.job_id,
            stage: stage.to_string(),
            current,
            total,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }
}

/// Report through an optional reporter
pub(crate) fn report(
    reporter: &Option<ProgressReporter>,
    stage: &str,
    current: usize,
    total: usize,
    message: impl Into<String>,
) {
    if let Some(r) = reporter {
        r.report(stage, current, total, message);
    }
}
