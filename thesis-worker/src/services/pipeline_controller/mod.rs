//! Thesis pipeline controller
//!
//! Drives one job through every stage:
//! QUEUED → RANKING → ACQUIRING → GENERATING → REPAIRING → HUMANIZING → COMPLETED
//!
//! Each stage lives in its own `phase_*` module as an `impl PipelineController`
//! block. Stages recover locally wherever a fallback exists; only a
//! `PipelineError::Fatal` ends the job, as FAILED.

use crate::config::WorkerConfig;
use crate::db;
use crate::error::PipelineError;
use crate::models::{JobState, ThesisJob};
use crate::services::progress::ProgressReporter;
use crate::types::ServiceRegistry;
use crate::utils::RetryPolicy;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Instant;
use thesis_common::events::{EventBus, PipelineEvent};
use tokio_util::sync::CancellationToken;

mod phase_acquisition;
mod phase_finalize;
mod phase_generation;
mod phase_humanizing;
mod phase_ranking;
mod phase_repair;

const CANCELLED_MESSAGE: &str = "Job cancelled by worker shutdown";

/// Runs thesis jobs against a set of collaborators
pub struct PipelineController {
    db: SqlitePool,
    event_bus: EventBus,
    services: ServiceRegistry,
    config: WorkerConfig,
    /// Override for service retry backoff (tests run without delays)
    backoff: Option<std::time::Duration>,
}

impl PipelineController {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        services: ServiceRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            services,
            config,
            backoff: None,
        }
    }

    /// Use a fixed initial backoff between service retries
    pub fn with_retry_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run `job` to COMPLETED or FAILED and return it in its final state
    ///
    /// The job is persisted at every transition. Errors never escape: a fatal
    /// pipeline error or a persistence failure marks the job FAILED.
    pub async fn run(&self, mut job: ThesisJob, cancel: &CancellationToken) -> ThesisJob {
        let start_time = Instant::now();
        tracing::info!(
            job_id = %job.job_id,
            title = %job.spec.title,
            leaves = job.spec.leaves().len(),
            "Starting thesis pipeline"
        );

        match self.execute(&mut job, cancel).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %job.job_id,
                    duration_seconds = start_time.elapsed().as_secs(),
                    word_count = job.metadata.word_count,
                    warnings = job.metadata.warnings.len(),
                    "Thesis pipeline completed"
                );
                self.event_bus.emit_lossy(PipelineEvent::JobCompleted {
                    job_id: job.job_id,
                    word_count: job.metadata.word_count,
                    warnings: job.metadata.warnings.len(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    job_id = %job.job_id,
                    state = %job.state,
                    error = %message,
                    "Thesis pipeline failed"
                );
                let transition = job.fail(message.clone());
                self.emit_transition(&job, transition.old_state);
                if let Err(db_err) = db::jobs::save_job(&self.db, &job).await {
                    tracing::error!(job_id = %job.job_id, error = %db_err, "Failed to persist job failure");
                }
                self.event_bus.emit_lossy(PipelineEvent::JobFailed {
                    job_id: job.job_id,
                    error: message,
                    timestamp: Utc::now(),
                });
            }
        }

        job
    }

    async fn execute(&self, job: &mut ThesisJob, cancel: &CancellationToken) -> Result<(), PipelineError> {
        job.metadata.target_words = job.spec.target_word_count(self.config.words_per_page);

        let ranked = self.phase_ranking(job).await?;
        check_cancelled(cancel)?;

        let sources = self.phase_acquisition(job, ranked).await?;
        check_cancelled(cancel)?;

        let mut tree = self.phase_generation(job, &sources).await?;
        check_cancelled(cancel)?;

        self.phase_repair(job, &mut tree).await?;
        check_cancelled(cancel)?;

        self.phase_humanizing(job, &mut tree).await?;
        check_cancelled(cancel)?;

        self.phase_finalize(job, &tree, &sources).await
    }

    /// Move `job` to `state`, persist it and broadcast the change
    pub(super) async fn transition(&self, job: &mut ThesisJob, state: JobState) -> Result<(), PipelineError> {
        let transition = job.transition_to(state);
        db::jobs::save_job(&self.db, job).await?;
        self.emit_transition(job, transition.old_state);
        tracing::info!(
            job_id = %job.job_id,
            old_state = %transition.old_state,
            new_state = %transition.new_state,
            "Job stage changed"
        );
        Ok(())
    }

    /// Persist metadata changes made inside a stage
    pub(super) async fn save(&self, job: &ThesisJob) -> Result<(), PipelineError> {
        db::jobs::save_job(&self.db, job).await?;
        Ok(())
    }

    fn emit_transition(&self, job: &ThesisJob, old_state: JobState) {
        self.event_bus.emit_lossy(PipelineEvent::JobStageChanged {
            job_id: job.job_id,
            old_state: old_state.to_string(),
            new_state: job.state.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub(super) fn reporter(&self, job: &ThesisJob) -> ProgressReporter {
        ProgressReporter::new(self.event_bus.clone(), job.job_id)
    }

    /// Retry policy for generation, scoring and index calls
    pub(super) fn service_retry(&self) -> RetryPolicy {
        self.policy(RetryPolicy::new(
            self.config.service_timeout(),
            self.config.max_service_attempts,
        ))
    }

    /// Retry policy for document downloads
    pub(super) fn fetch_retry(&self) -> RetryPolicy {
        self.policy(RetryPolicy::new(
            self.config.fetch_timeout(),
            self.config.max_service_attempts,
        ))
    }

    fn policy(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(backoff) = self.backoff {
            policy.initial_backoff = backoff;
        }
        policy
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Fatal(CANCELLED_MESSAGE.to_string()));
    }
    Ok(())
}
