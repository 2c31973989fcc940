//! HUMANIZING: style convergence against the detectability scorer

use super::PipelineController;
use crate::db;
use crate::error::PipelineError;
use crate::models::{DocumentTree, JobState, ThesisJob};
use crate::services::style_convergence::{StyleConfig, StyleConvergenceLoop};
use std::sync::Arc;

impl PipelineController {
    /// Phase 5: HUMANIZING
    ///
    /// Never fatal: an unavailable detector leaves the text as it is.
    pub(super) async fn phase_humanizing(&self, job: &mut ThesisJob, tree: &mut DocumentTree) -> Result<(), PipelineError> {
        self.transition(job, JobState::Humanizing).await?;

        let style = StyleConvergenceLoop::new(
            Arc::clone(&self.services.detector),
            Arc::clone(&self.services.generator),
            StyleConfig {
                min_human_score: self.config.min_human_score,
                iterations: self.config.style_iterations,
                spans_per_iteration: self.config.spans_per_iteration,
                chunk_chars: self.config.detector_chunk_chars,
                pause: self.config.iteration_pause(),
                retry: self.service_retry(),
            },
        )
        .with_progress(self.reporter(job));

        let language = job.spec.language.clone();
        let outcome = style.run(tree, &language).await;

        for warning in outcome.warnings {
            job.warn(warning);
        }
        if outcome.summary.initial_score.is_some() {
            db::audit::record_style_history(&self.db, job.job_id, &outcome.summary).await?;
        }
        job.metadata.style = Some(outcome.summary);
        job.metadata.word_count = tree.word_count();

        self.save(job).await
    }
}
