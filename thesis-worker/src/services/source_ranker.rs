//! Candidate deduplication and ranking
//!
//! A thin filter over the relevance scorer: dedup by normalized external id,
//! flag mandatory sources, score, drop what falls under the relevance floor
//! and order mandatory-first, then by relevance.

use crate::models::{ReferenceRecord, ThesisSpec};
use crate::types::RelevanceScorer;
use crate::utils::{retry_with_backoff, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SourceRanker {
    scorer: Arc<dyn RelevanceScorer>,
    relevance_floor: f64,
    default_score: f64,
    retry: RetryPolicy,
}

impl SourceRanker {
    pub fn new(
        scorer: Arc<dyn RelevanceScorer>,
        relevance_floor: f64,
        default_score: f64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            scorer,
            relevance_floor,
            default_score,
            retry,
        }
    }

    /// Dedup, score and order candidates
    pub async fn rank(
        &self,
        spec: &ThesisSpec,
        candidates: Vec<ReferenceRecord>,
    ) -> Vec<ReferenceRecord> {
        let found = candidates.len();
        let mut records = dedup(candidates);
        mark_mandatory(&mut records, &spec.mandatory_sources);

        let scorer = Arc::clone(&self.scorer);
        let to_score = records.clone();
        let owned_spec = spec.clone();
        let scored = retry_with_backoff("relevance scoring", self.retry, move || {
            let scorer = Arc::clone(&scorer);
            let batch = to_score.clone();
            let spec = owned_spec.clone();
            async move { scorer.score(&spec, batch).await }
        })
        .await;

        let mut records = match scored {
            // Scorers may reorder; only accept a reply that keeps every record
            Ok(scored) if scored.len() == records.len() => scored,
            Ok(scored) => {
                warn!(
                    expected = records.len(),
                    returned = scored.len(),
                    "Relevance scorer changed the candidate count, using default scores"
                );
                records
            }
            Err(e) => {
                warn!(error = %e, "Relevance scoring failed, using default scores");
                records
            }
        };

        for record in records.iter_mut() {
            if record.relevance_score.is_none() {
                record.relevance_score = Some(self.default_score);
            }
        }

        let before_floor = records.len();
        records.retain(|r| r.mandatory || r.relevance() >= self.relevance_floor);
        debug!(
            dropped = before_floor - records.len(),
            floor = self.relevance_floor,
            "Dropped low-relevance candidates"
        );

        sort_ranked(&mut records);

        info!(
            found,
            unique = before_floor,
            ranked = records.len(),
            mandatory = records.iter().filter(|r| r.mandatory).count(),
            "Ranked reference candidates"
        );
        records
    }
}

/// Drop records whose normalized external id was already seen
///
/// The first occurrence wins; later duplicates only fill in fields the first
/// one lacks.
pub fn dedup(records: Vec<ReferenceRecord>) -> Vec<ReferenceRecord> {
    let mut out: Vec<ReferenceRecord> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = record.dedup_key();
        if key.is_empty() {
            continue;
        }
        match positions.get(&key) {
            Some(&i) => {
                let kept = &mut out[i];
                kept.mandatory |= record.mandatory;
                if kept.document_url.is_none() {
                    kept.document_url = record.document_url;
                }
                if kept.abstract_text.is_none() {
                    kept.abstract_text = record.abstract_text;
                }
                if kept.doi.is_none() {
                    kept.doi = record.doi;
                }
            }
            None => {
                positions.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

fn mark_mandatory(records: &mut [ReferenceRecord], mandatory: &[String]) {
    for wanted in mandatory {
        let mut matched = false;
        for record in records.iter_mut() {
            if record.matches_title_or_doi(wanted) {
                record.mandatory = true;
                matched = true;
            }
        }
        if !matched {
            warn!(source = %wanted, "Mandatory source not found among candidates");
        }
    }
}

/// Mandatory first, then relevance descending; stable for ties
pub fn sort_ranked(records: &mut [ReferenceRecord]) {
    records.sort_by(|a, b| {
        b.mandatory
            .cmp(&a.mandatory)
            .then_with(|| b.relevance().total_cmp(&a.relevance()))
    });
}
