//! Concurrent reference acquisition with dynamic backfill
//!
//! W workers pull candidates from a shared FIFO queue. Each candidate is
//! downloaded, validated (magic bytes, size bounds, duplicate content), page
//! counted and uploaded to the document index. A failed candidate is never
//! retried; the failing worker instead claims the best unused candidate
//! (same chapter affinity first, then relevance) and queues it.
//!
//! Invariants:
//! - successes never exceed the target (slots are reserved before upload)
//! - a validated candidate waits for a slot while uploads are in flight; it is
//!   only dropped once the target is actually met
//! - a candidate is claimed at most once (`AcquisitionTask::try_claim`)
//! - individual failures never fail the pool

use crate::error::PipelineError;
use crate::models::{AcquisitionTask, ReferenceRecord};
use crate::services::progress::{self, ProgressReporter};
use crate::services::source_ranker::sort_ranked;
use crate::types::{DocumentFetcher, DocumentIndex, IndexMetadata};
use crate::utils::{retry_with_backoff, RetryPolicy};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

const PDF_MIME: &str = "application/pdf";

/// Tuning for one pool run
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub workers: usize,
    pub target: usize,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub bytes_per_page: usize,
    pub relevance_floor: f64,
    pub min_per_chapter: usize,
    pub store_id: String,
    pub fetch_retry: RetryPolicy,
    pub index_retry: RetryPolicy,
}

/// A candidate that did not make it
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionFailure {
    pub external_id: String,
    pub title: String,
    pub reason: String,
}

/// Outcome of a pool run
#[derive(Debug, Clone, Default)]
pub struct AcquisitionReport {
    pub target: usize,
    /// Candidates with a document URL that entered the pool
    pub candidates: usize,
    /// Acquired records with page range attached, ranked order
    pub acquired: Vec<ReferenceRecord>,
    pub failures: Vec<AcquisitionFailure>,
    /// Dedup keys of every claimed candidate, in claim order
    pub used_ids: Vec<String>,
}

impl AcquisitionReport {
    pub fn shortfall(&self) -> usize {
        self.target.saturating_sub(self.acquired.len())
    }
}

enum TaskOutcome {
    Acquired(ReferenceRecord),
    /// Target met while this candidate was in flight; it is dropped unused
    TargetReached,
}

/// Shared state of one pool run
struct PoolState {
    tasks: Vec<AcquisitionTask>,
    queue: Mutex<VecDeque<usize>>,
    /// Successful uploads
    successes: AtomicUsize,
    /// Successes plus uploads in flight; never exceeds `target`
    slots: AtomicUsize,
    /// Signalled when a slot is released or a success is recorded
    slot_changed: Notify,
    target: usize,
    used_ids: Mutex<Vec<String>>,
    acquired: Mutex<Vec<ReferenceRecord>>,
    failures: Mutex<Vec<AcquisitionFailure>>,
    content_hashes: Mutex<HashSet<String>>,
}

impl PoolState {
    fn new(tasks: Vec<AcquisitionTask>, target: usize) -> Self {
        Self {
            tasks,
            queue: Mutex::new(VecDeque::new()),
            successes: AtomicUsize::new(0),
            slots: AtomicUsize::new(0),
            slot_changed: Notify::new(),
            target,
            used_ids: Mutex::new(Vec::new()),
            acquired: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            content_hashes: Mutex::new(HashSet::new()),
        }
    }

    fn target_reached(&self) -> bool {
        self.successes.load(Ordering::Acquire) >= self.target
    }

    fn reserve_slot(&self) -> bool {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.target).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
        self.slot_changed.notify_waiters();
    }

    /// Count a finished upload; returns the new success count
    fn record_success(&self) -> usize {
        let done = self.successes.fetch_add(1, Ordering::AcqRel) + 1;
        self.slot_changed.notify_waiters();
        done
    }

    /// Wait for an upload slot; false once the target is met
    async fn wait_for_slot(&self) -> bool {
        loop {
            let changed = self.slot_changed.notified();
            if self.reserve_slot() {
                return true;
            }
            if self.target_reached() {
                return false;
            }
            changed.await;
        }
    }

    /// Claim task `idx`; records the claim when it succeeds
    async fn claim(&self, idx: usize) -> bool {
        if !self.tasks[idx].try_claim() {
            return false;
        }
        self.used_ids
            .lock()
            .await
            .push(self.tasks[idx].record.dedup_key());
        true
    }

    /// Claim and queue the best unused replacement for a failed task
    async fn backfill(&self, failed: usize, relevance_floor: f64) -> Option<usize> {
        let affinity = self.tasks[failed].record.chapter_affinity.as_deref();

        let eligible = |task: &AcquisitionTask| {
            !task.is_used()
                && (task.record.mandatory || task.record.relevance() >= relevance_floor)
        };

        // Tasks are in ranked order, so the first eligible one is the best.
        // A lost claim race restarts the search, same chapter first.
        loop {
            let same_chapter = affinity.and_then(|chapter| {
                self.tasks.iter().position(|t| {
                    eligible(t) && t.record.chapter_affinity.as_deref() == Some(chapter)
                })
            });
            let idx = same_chapter.or_else(|| self.tasks.iter().position(&eligible))?;

            if self.claim(idx).await {
                self.queue.lock().await.push_back(idx);
                return Some(idx);
            }
        }
    }
}

/// Bounded concurrent acquisition pool
pub struct AcquisitionPool {
    fetcher: Arc<dyn DocumentFetcher>,
    index: Arc<dyn DocumentIndex>,
    config: AcquisitionConfig,
    progress: Option<ProgressReporter>,
}

impl AcquisitionPool {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        index: Arc<dyn DocumentIndex>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            fetcher,
            index,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Acquire up to `config.target` documents from ranked `candidates`
    pub async fn run(&self, candidates: Vec<ReferenceRecord>) -> AcquisitionReport {
        let mut fetchable: Vec<ReferenceRecord> = candidates
            .into_iter()
            .filter(|r| r.document_url.is_some())
            .collect();
        sort_ranked(&mut fetchable);

        let target = self.config.target.min(fetchable.len());
        let candidate_count = fetchable.len();

        let state = PoolState::new(
            fetchable.into_iter().map(AcquisitionTask::new).collect(),
            target,
        );

        if target == 0 {
            info!(candidates = candidate_count, "No fetchable candidates, skipping acquisition");
            return AcquisitionReport {
                target: self.config.target,
                candidates: candidate_count,
                ..Default::default()
            };
        }

        let seeds = select_seeds(&state.tasks, target, self.config.min_per_chapter);
        for idx in seeds {
            if state.claim(idx).await {
                state.queue.lock().await.push_back(idx);
            }
        }

        let seeded = state.queue.lock().await.len();
        info!(
            target,
            candidates = candidate_count,
            seeded,
            workers = self.config.workers,
            "Starting acquisition pool"
        );

        let workers = (0..self.config.workers.max(1)).map(|worker_id| self.worker(worker_id, &state));
        join_all(workers).await;

        let mut acquired = state.acquired.into_inner();
        sort_ranked(&mut acquired);

        let report = AcquisitionReport {
            target: self.config.target,
            candidates: candidate_count,
            acquired,
            failures: state.failures.into_inner(),
            used_ids: state.used_ids.into_inner(),
        };

        info!(
            acquired = report.acquired.len(),
            failed = report.failures.len(),
            claimed = report.used_ids.len(),
            shortfall = report.shortfall(),
            "Acquisition pool finished"
        );
        report
    }

    async fn worker(&self, worker_id: usize, state: &PoolState) {
        loop {
            if state.target_reached() {
                break;
            }
            let Some(idx) = state.queue.lock().await.pop_front() else {
                break;
            };

            let record = &state.tasks[idx].record;
            match self.acquire_one(state, record).await {
                Ok(TaskOutcome::Acquired(acquired)) => {
                    let done = state.record_success();
                    debug!(worker_id, title = %acquired.title, done, "Document acquired");
                    progress::report(
                        &self.progress,
                        "ACQUIRING",
                        done,
                        state.target,
                        format!("{}/{} documents", done, state.target),
                    );
                    state.acquired.lock().await.push(acquired);
                }
                Ok(TaskOutcome::TargetReached) => break,
                Err(e) => {
                    warn!(worker_id, title = %record.title, error = %e, "Acquisition failed");
                    state.failures.lock().await.push(AcquisitionFailure {
                        external_id: record.external_id.clone(),
                        title: record.title.clone(),
                        reason: e.to_string(),
                    });

                    if state.target_reached() {
                        break;
                    }
                    match state.backfill(idx, self.config.relevance_floor).await {
                        Some(replacement) => debug!(
                            worker_id,
                            replacement = %state.tasks[replacement].record.title,
                            "Queued replacement candidate"
                        ),
                        None => debug!(worker_id, "No replacement candidate left"),
                    }
                }
            }
        }
    }

    /// Fetch, validate, count pages and index one candidate
    async fn acquire_one(
        &self,
        state: &PoolState,
        record: &ReferenceRecord,
    ) -> Result<TaskOutcome, PipelineError> {
        let url = record
            .document_url
            .as_deref()
            .ok_or_else(|| PipelineError::Validation("no document URL".to_string()))?;

        let fetcher = Arc::clone(&self.fetcher);
        let owned_url = url.to_string();
        let bytes = retry_with_backoff("document fetch", self.config.fetch_retry, move || {
            let fetcher = Arc::clone(&fetcher);
            let url = owned_url.clone();
            async move { fetcher.fetch(&url).await }
        })
        .await?;

        if state.target_reached() {
            return Ok(TaskOutcome::TargetReached);
        }

        validate_document(&bytes, self.config.min_bytes, self.config.max_bytes)?;

        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        if !state.content_hashes.lock().await.insert(content_hash.clone()) {
            return Err(PipelineError::Validation(
                "same content as an already acquired document".to_string(),
            ));
        }

        let bytes_per_page = self.config.bytes_per_page;
        let (bytes, page_count) = tokio::task::spawn_blocking(move || {
            let pages = page_count(&bytes, bytes_per_page);
            (bytes, pages)
        })
        .await
        .map_err(|e| PipelineError::Validation(format!("page count task failed: {}", e)))?;

        if !state.wait_for_slot().await {
            return Ok(TaskOutcome::TargetReached);
        }

        let metadata = IndexMetadata {
            store_id: self.config.store_id.clone(),
            display_name: record.title.clone(),
            external_id: record.external_id.clone(),
            authors: record.authors.clone(),
            year: record.year,
            page_count,
            mime_type: PDF_MIME.to_string(),
            content_hash,
        };

        let index = Arc::clone(&self.index);
        let bytes = Arc::new(bytes);
        let upload_metadata = metadata.clone();
        let uploaded = retry_with_backoff("index upload", self.config.index_retry, move || {
            let index = Arc::clone(&index);
            let bytes = Arc::clone(&bytes);
            let metadata = upload_metadata.clone();
            async move { index.upload(&bytes, &metadata).await }
        })
        .await;

        match uploaded {
            Ok(true) => {
                let mut acquired = record.clone();
                acquired.page_start = Some(1);
                acquired.page_end = Some(page_count);
                Ok(TaskOutcome::Acquired(acquired))
            }
            Ok(false) => {
                state.release_slot();
                Err(PipelineError::Validation("index rejected the document".to_string()))
            }
            Err(e) => {
                state.release_slot();
                Err(PipelineError::TransientService(e))
            }
        }
    }
}

/// Initial queue: mandatory candidates, per-chapter coverage, then relevance
/// until at least `target` are seeded
fn select_seeds(tasks: &[AcquisitionTask], target: usize, min_per_chapter: usize) -> Vec<usize> {
    let mut seeds: Vec<usize> = Vec::new();
    let mut chosen = vec![false; tasks.len()];
    let mut pick = |idx: usize, seeds: &mut Vec<usize>| {
        if !chosen[idx] {
            chosen[idx] = true;
            seeds.push(idx);
        }
    };

    for (idx, task) in tasks.iter().enumerate() {
        if task.record.mandatory {
            pick(idx, &mut seeds);
        }
    }

    let mut chapters: Vec<&str> = Vec::new();
    for task in tasks {
        if let Some(chapter) = task.record.chapter_affinity.as_deref() {
            if !chapters.contains(&chapter) {
                chapters.push(chapter);
            }
        }
    }
    for chapter in chapters {
        let covered = seeds
            .iter()
            .filter(|&&i| tasks[i].record.chapter_affinity.as_deref() == Some(chapter))
            .count();
        let wanted = min_per_chapter.saturating_sub(covered);
        let extra: Vec<usize> = tasks
            .iter()
            .enumerate()
            .filter(|(i, t)| {
                !seeds.contains(i) && t.record.chapter_affinity.as_deref() == Some(chapter)
            })
            .map(|(i, _)| i)
            .take(wanted)
            .collect();
        for idx in extra {
            pick(idx, &mut seeds);
        }
    }

    for idx in 0..tasks.len() {
        if seeds.len() >= target {
            break;
        }
        pick(idx, &mut seeds);
    }

    seeds
}

/// Check magic bytes and size bounds
pub fn validate_document(bytes: &[u8], min_bytes: usize, max_bytes: usize) -> Result<(), PipelineError> {
    if bytes.len() < min_bytes {
        return Err(PipelineError::Validation(format!(
            "document too small ({} bytes, minimum {})",
            bytes.len(),
            min_bytes
        )));
    }
    if bytes.len() > max_bytes {
        return Err(PipelineError::Validation(format!(
            "document too large ({} bytes, maximum {})",
            bytes.len(),
            max_bytes
        )));
    }
    match infer::get(bytes) {
        Some(kind) if kind.mime_type() == PDF_MIME => Ok(()),
        Some(kind) => Err(PipelineError::Validation(format!(
            "unsupported document type {}",
            kind.mime_type()
        ))),
        None => Err(PipelineError::Validation("unrecognized document format".to_string())),
    }
}

/// Page count from the PDF page tree, or a size-based estimate
pub fn page_count(bytes: &[u8], bytes_per_page: usize) -> u32 {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => {
            let pages = doc.get_pages().len() as u32;
            if pages > 0 {
                return pages;
            }
        }
        Err(e) => debug!(error = %e, "PDF parse failed, estimating page count"),
    }
    estimate_pages(bytes.len(), bytes_per_page)
}

fn estimate_pages(len: usize, bytes_per_page: usize) -> u32 {
    let per_page = bytes_per_page.max(1);
    (len.div_ceil(per_page)).max(1) as u32
}
