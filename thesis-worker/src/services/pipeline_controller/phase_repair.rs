//! REPAIRING: critique and patch until no defect is left or iterations run out

use super::PipelineController;
use crate::db;
use crate::error::PipelineError;
use crate::models::{DocumentTree, JobState, PipelineWarning, ThesisJob};
use crate::services::critique_engine::CritiqueEngine;
use crate::services::patch_engine::PatchEngine;
use crate::services::repair_loop::{RepairConfig, RepairLoop};
use std::sync::Arc;

impl PipelineController {
    /// Phase 4: REPAIRING
    pub(super) async fn phase_repair(&self, job: &mut ThesisJob, tree: &mut DocumentTree) -> Result<(), PipelineError> {
        self.transition(job, JobState::Repairing).await?;

        let retry = self.service_retry();
        let critique = CritiqueEngine::new(
            Arc::clone(&self.services.generator),
            self.config.repair_concurrency,
            self.config.min_quote_chars,
            retry,
        );
        let patcher = PatchEngine::new(self.config.patch_safety_ratio, self.config.fuzzy_anchor_chars);
        let repair = RepairLoop::new(
            critique,
            patcher,
            Arc::clone(&self.services.generator),
            RepairConfig {
                iterations: self.config.repair_iterations,
                concurrency: self.config.repair_concurrency,
                retry,
            },
        )
        .with_progress(self.reporter(job));

        let outcome = repair.run(tree).await;

        db::audit::record_defect_audits(&self.db, job.job_id, &outcome.audits).await?;
        if !outcome.remaining.is_empty() {
            job.warn(PipelineWarning::DefectsUnresolved {
                remaining: outcome.remaining.len(),
            });
        }
        job.metadata.repair = Some(outcome.summary);
        job.metadata.word_count = tree.word_count();

        db::documents::save_document(&self.db, job.job_id, tree, "").await?;
        self.save(job).await
    }
}
