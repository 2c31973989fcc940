//! Quality check, bibliography and the final document

use super::PipelineController;
use crate::db;
use crate::error::PipelineError;
use crate::models::{DocumentTree, JobState, ReferenceRecord, ThesisJob};
use crate::services::citations::{cited_references, count_citations, render_bibliography};
use crate::services::quality_checker::QualityChecker;

impl PipelineController {
    /// Final step: validate, attach the bibliography, store and complete
    ///
    /// Quality errors are reported in metadata; they never fail the job.
    pub(super) async fn phase_finalize(
        &self,
        job: &mut ThesisJob,
        tree: &DocumentTree,
        sources: &[ReferenceRecord],
    ) -> Result<(), PipelineError> {
        let text = tree.reassemble();
        let word_count = tree.word_count();

        let cited = cited_references(&text, sources);
        let citations = count_citations(&text);
        let checker = QualityChecker::new(self.config.min_word_ratio, self.config.max_word_ratio);
        let quality = checker.check(
            &text,
            word_count,
            job.metadata.target_words,
            &job.spec.mandatory_sources,
            &cited,
        );

        if !quality.valid {
            tracing::warn!(
                job_id = %job.job_id,
                errors = ?quality.errors,
                "Quality check found problems"
            );
        }
        tracing::info!(
            job_id = %job.job_id,
            word_count,
            citation_markers = citations.total(),
            references_cited = cited.len(),
            "Document finalized"
        );

        let bibliography = render_bibliography(&cited, job.spec.citation_style, &job.spec.language);
        db::documents::save_document(&self.db, job.job_id, tree, &bibliography).await?;

        job.metadata.word_count = word_count;
        job.metadata.references_cited = cited.len();
        job.metadata.quality = Some(quality);

        self.transition(job, JobState::Completed).await
    }
}
