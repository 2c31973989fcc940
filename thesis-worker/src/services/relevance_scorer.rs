//! Relevance scoring through the text generator
//!
//! Candidates are scored in batches. Entries the model leaves out keep the
//! configured default score; a batch whose reply cannot be parsed fails as a
//! `ServiceError::Parse` so the ranker can fall back.

use crate::error::ServiceError;
use crate::models::{ReferenceRecord, ThesisSpec};
use crate::services::prompts;
use crate::types::{GenerationRequest, GenerationTask, RelevanceScorer, TextGenerator};
use crate::utils::extract_json;
use serde::Deserialize;
use std::sync::Arc;

const BATCH_SIZE: usize = 20;
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    index: usize,
    score: f64,
}

pub struct LlmRelevanceScorer {
    generator: Arc<dyn TextGenerator>,
    default_score: f64,
}

impl LlmRelevanceScorer {
    pub fn new(generator: Arc<dyn TextGenerator>, default_score: f64) -> Self {
        Self {
            generator,
            default_score,
        }
    }
}

#[async_trait::async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn score(
        &self,
        spec: &ThesisSpec,
        records: Vec<ReferenceRecord>,
    ) -> Result<Vec<ReferenceRecord>, ServiceError> {
        let mut scored = Vec::with_capacity(records.len());

        for batch in records.chunks(BATCH_SIZE) {
            let request = GenerationRequest::new(
                GenerationTask::Relevance,
                prompts::relevance_prompt(spec, batch),
                MAX_TOKENS,
            );
            let reply = self.generator.generate(request).await?;
            let entries: Vec<ScoreEntry> = extract_json(&reply)
                .ok_or_else(|| ServiceError::Parse("relevance reply is not a JSON list".into()))?;

            let mut scores = vec![self.default_score; batch.len()];
            for entry in entries {
                if let Some(slot) = scores.get_mut(entry.index) {
                    *slot = entry.score.clamp(0.0, 100.0);
                }
            }

            for (record, score) in batch.iter().zip(scores) {
                scored.push(record.clone().with_relevance(score));
            }
        }

        Ok(scored)
    }
}
