//! Job scheduler
//!
//! Submitted jobs go through a channel to one dispatcher task, which starts at
//! most `max_concurrent_jobs` pipeline runs at a time. The counters behind
//! `/health` live here instead of in process-wide state.

use crate::db;
use crate::models::ThesisJob;
use crate::services::pipeline_controller::PipelineController;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thesis_common::events::{EventBus, PipelineEvent};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Jobs waiting in the channel before `submit` starts to wait
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Scheduler is shut down")]
    Closed,

    #[error(transparent)]
    Persistence(#[from] thesis_common::Error),
}

/// A job handed to the dispatcher
#[derive(Debug)]
pub struct QueuedJob {
    pub job: ThesisJob,
}

pub struct Scheduler {
    db: SqlitePool,
    event_bus: EventBus,
    tx: mpsc::Sender<QueuedJob>,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the dispatcher task
    pub fn start(
        db: SqlitePool,
        event_bus: EventBus,
        controller: Arc<PipelineController>,
        max_concurrent_jobs: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let active = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch(
            rx,
            controller,
            Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            Arc::clone(&active),
            Arc::clone(&queued),
            cancel.clone(),
        ));

        tracing::info!(max_concurrent_jobs, "Scheduler started");

        Arc::new(Self {
            db,
            event_bus,
            tx,
            active,
            queued,
            cancel,
            dispatcher: std::sync::Mutex::new(Some(dispatcher)),
        })
    }

    /// Persist `job` as QUEUED and hand it to the dispatcher
    pub async fn submit(&self, job: ThesisJob) -> Result<Uuid, SchedulerError> {
        if self.cancel.is_cancelled() || self.tx.is_closed() {
            return Err(SchedulerError::Closed);
        }
        let job_id = job.job_id;
        if !db::jobs::insert_job(&self.db, &job).await? {
            return Err(SchedulerError::Duplicate(job_id));
        }

        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(QueuedJob { job }).await.is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(SchedulerError::Closed);
        }

        self.event_bus.emit_lossy(PipelineEvent::JobQueued {
            job_id,
            timestamp: Utc::now(),
        });
        tracing::info!(job_id = %job_id, queued = self.queued_jobs(), "Job queued");
        Ok(job_id)
    }

    /// False once shutdown has started
    pub fn is_accepting(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Pipeline runs in progress
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Jobs accepted but not started
    pub fn queued_jobs(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Stop accepting jobs and cancel running pipelines at their next stage boundary
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = match self.dispatcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<QueuedJob>,
    controller: Arc<PipelineController>,
    limit: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let mut running: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let queued_job = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(queued_job) => queued_job,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        queued.fetch_sub(1, Ordering::AcqRel);
        active.fetch_add(1, Ordering::AcqRel);

        let controller = Arc::clone(&controller);
        let active = Arc::clone(&active);
        let cancel = cancel.clone();
        running.retain(|handle| !handle.is_finished());
        running.push(tokio::spawn(async move {
            let job = controller.run(queued_job.job, &cancel).await;
            tracing::debug!(job_id = %job.job_id, state = %job.state, "Pipeline run finished");
            active.fetch_sub(1, Ordering::AcqRel);
            drop(permit);
        }));
    }

    rx.close();
    for handle in running {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Pipeline task ended abnormally");
        }
    }
}
