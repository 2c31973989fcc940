//! ACQUIRING: download, validate and index the ranked references

use super::PipelineController;
use crate::error::PipelineError;
use crate::models::{AcquisitionSummary, JobState, PipelineWarning, ReferenceRecord, ThesisJob};
use crate::services::acquisition_pool::{AcquisitionConfig, AcquisitionPool};
use crate::utils::retry_with_backoff;
use std::sync::Arc;

impl PipelineController {
    /// Phase 2: ACQUIRING
    ///
    /// Returns the references the generator should cite. Normally these are
    /// the acquired documents; when nothing new could be acquired but the
    /// index already holds documents, the ranked candidates stand in.
    pub(super) async fn phase_acquisition(
        &self,
        job: &mut ThesisJob,
        ranked: Vec<ReferenceRecord>,
    ) -> Result<Vec<ReferenceRecord>, PipelineError> {
        self.transition(job, JobState::Acquiring).await?;

        let target = self.config.source_target(job.metadata.target_words);
        let config = AcquisitionConfig {
            workers: self.config.acquisition_workers,
            target,
            min_bytes: self.config.min_document_bytes,
            max_bytes: self.config.max_document_bytes,
            bytes_per_page: self.config.bytes_per_page_estimate,
            relevance_floor: self.config.replacement_relevance_floor,
            min_per_chapter: self.config.min_sources_per_chapter,
            store_id: self.services.index_store_id.clone(),
            fetch_retry: self.fetch_retry(),
            index_retry: self.service_retry(),
        };

        let pool = AcquisitionPool::new(
            Arc::clone(&self.services.fetcher),
            Arc::clone(&self.services.index),
            config,
        )
        .with_progress(self.reporter(job));
        let report = pool.run(ranked.clone()).await;

        job.metadata.acquisition = Some(AcquisitionSummary {
            target,
            acquired: report.acquired.len(),
            failed: report.failures.len(),
            candidates: report.candidates,
        });

        let sources = if report.acquired.is_empty() {
            let index = Arc::clone(&self.services.index);
            let store_id = self.services.index_store_id.clone();
            let populated = retry_with_backoff("index status", self.service_retry(), move || {
                let index = Arc::clone(&index);
                let store_id = store_id.clone();
                async move { index.has_documents(&store_id).await }
            })
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(job_id = %job.job_id, error = %e, "Index status unavailable");
                false
            });

            if !populated {
                return Err(PipelineError::Fatal(format!(
                    "No documents acquired ({} candidates tried) and the index is empty",
                    report.failures.len()
                )));
            }
            job.warn(PipelineWarning::NoNewDocuments);
            let mut fallback = ranked;
            fallback.truncate(self.config.max_sources);
            fallback
        } else {
            if report.shortfall() > 0 {
                job.warn(PipelineWarning::AcquisitionShortfall {
                    target,
                    acquired: report.acquired.len(),
                });
            }
            report.acquired
        };

        self.save(job).await?;
        Ok(sources)
    }
}
