//! GENERATING: per-leaf text generation in outline order

use super::PipelineController;
use crate::db;
use crate::error::PipelineError;
use crate::models::{DocumentTree, JobState, ReferenceRecord, ThesisJob};
use crate::services::section_generator::{GenerationConfig, SectionGenerator};
use std::sync::Arc;

impl PipelineController {
    /// Phase 3: GENERATING
    ///
    /// A draft is stored as soon as it exists. Every leaf failing means the
    /// generation service is unusable and the job fails.
    pub(super) async fn phase_generation(
        &self,
        job: &mut ThesisJob,
        sources: &[ReferenceRecord],
    ) -> Result<DocumentTree, PipelineError> {
        self.transition(job, JobState::Generating).await?;

        let generator = SectionGenerator::new(
            Arc::clone(&self.services.generator),
            GenerationConfig {
                attempts: self.config.generation_attempts,
                min_word_ratio: self.config.min_word_ratio,
                rolling_context_chars: self.config.rolling_context_chars,
                upcoming_preview_count: self.config.upcoming_preview_count,
                retry: self.service_retry(),
            },
        )
        .with_progress(self.reporter(job));

        let mut tree = DocumentTree::from_outline(&job.spec.outline);
        let report = generator
            .generate_document(&job.spec, &mut tree, sources, job.metadata.target_words)
            .await;

        job.metadata.sections_generated = report.generated();
        job.metadata.sections_failed = report.failed();
        if report.all_failed() {
            return Err(PipelineError::Fatal(
                "Text generation unavailable: no section could be generated".to_string(),
            ));
        }
        for warning in report.warnings {
            job.warn(warning);
        }

        job.metadata.word_count = tree.word_count();
        db::documents::save_document(&self.db, job.job_id, &tree, "").await?;
        self.save(job).await?;
        Ok(tree)
    }
}
