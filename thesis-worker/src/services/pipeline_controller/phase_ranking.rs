//! RANKING: literature search and relevance ranking

use super::PipelineController;
use crate::error::PipelineError;
use crate::models::{JobState, PipelineWarning, ReferenceRecord, ThesisJob, ThesisSpec};
use crate::services::source_ranker::SourceRanker;
use crate::utils::retry_with_backoff;
use std::sync::Arc;

/// One search to run, with the chapter its results belong to
#[derive(Debug, Clone, PartialEq)]
pub(super) struct SearchQuery {
    pub text: String,
    pub chapter: Option<String>,
}

/// Thesis-level query, one query per top-level chapter, one per mandatory source
pub(super) fn build_queries(spec: &ThesisSpec) -> Vec<SearchQuery> {
    let mut queries = vec![SearchQuery {
        text: join_terms(&spec.title, &spec.field),
        chapter: None,
    }];

    for chapter in &spec.outline {
        queries.push(SearchQuery {
            text: join_terms(&chapter.title, &spec.field),
            chapter: Some(chapter.id.clone()),
        });
    }

    for source in &spec.mandatory_sources {
        let source = source.trim();
        if !source.is_empty() {
            queries.push(SearchQuery {
                text: source.to_string(),
                chapter: None,
            });
        }
    }

    queries
}

fn join_terms(a: &str, b: &str) -> String {
    let b = b.trim();
    if b.is_empty() {
        a.trim().to_string()
    } else {
        format!("{} {}", a.trim(), b)
    }
}

impl PipelineController {
    /// Phase 1: RANKING
    ///
    /// Failed searches become warnings. No search results at all is fatal:
    /// there is nothing to ground the text on.
    pub(super) async fn phase_ranking(&self, job: &mut ThesisJob) -> Result<Vec<ReferenceRecord>, PipelineError> {
        self.transition(job, JobState::Ranking).await?;

        let queries = build_queries(&job.spec);
        let reporter = self.reporter(job);
        let search = Arc::clone(&self.services.search);
        let retry = self.service_retry();
        let mut candidates = Vec::new();

        for (i, query) in queries.iter().enumerate() {
            let provider = Arc::clone(&search);
            let query_text = query.text.clone();
            let query_language = job.spec.language.clone();
            let result = retry_with_backoff("reference search", retry, move || {
                let search = Arc::clone(&provider);
                let text = query_text.clone();
                let language = query_language.clone();
                async move { search.search(&text, &language).await }
            })
            .await;

            match result {
                Ok(records) => {
                    tracing::debug!(
                        job_id = %job.job_id,
                        provider = search.name(),
                        query = %query.text,
                        results = records.len(),
                        "Search finished"
                    );
                    candidates.extend(records.into_iter().map(|mut record| {
                        if record.chapter_affinity.is_none() {
                            record.chapter_affinity = query.chapter.clone();
                        }
                        record
                    }));
                }
                Err(e) => job.warn(PipelineWarning::SearchFailed {
                    query: query.text.clone(),
                    error: e.to_string(),
                }),
            }
            reporter.report("RANKING", i + 1, queries.len(), format!("{} candidates", candidates.len()));
        }

        if candidates.is_empty() {
            return Err(PipelineError::Fatal(format!(
                "No references found for '{}'",
                job.spec.title
            )));
        }

        let ranker = SourceRanker::new(
            Arc::clone(&self.services.scorer),
            self.config.replacement_relevance_floor,
            self.config.default_relevance_score,
            retry,
        );
        let ranked = ranker.rank(&job.spec, candidates).await;
        if ranked.is_empty() {
            return Err(PipelineError::Fatal(
                "No reference passed the relevance floor".to_string(),
            ));
        }

        job.metadata.references_ranked = ranked.len();
        self.save(job).await?;
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CitationStyle, LengthUnit, OutlineNode};

    #[test]
    fn test_queries_cover_chapters_and_mandatory_sources() {
        let spec = ThesisSpec {
            title: "Remote Work".to_string(),
            field: "Economics".to_string(),
            language: "en".to_string(),
            thesis_type: String::new(),
            research_question: String::new(),
            citation_style: CitationStyle::Apa,
            target_length: 1000,
            length_unit: LengthUnit::Words,
            outline: vec![
                OutlineNode::new("1", "Introduction"),
                OutlineNode::new("2", "Productivity")
                    .with_children(vec![OutlineNode::new("2.1", "Evidence")]),
            ],
            mandatory_sources: vec!["The Future of Work".to_string(), "  ".to_string()],
        };

        let queries = build_queries(&spec);
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[0].text, "Remote Work Economics");
        assert_eq!(queries[0].chapter, None);
        assert_eq!(queries[2].text, "Productivity Economics");
        assert_eq!(queries[2].chapter.as_deref(), Some("2"));
        assert_eq!(queries[3].text, "The Future of Work");
    }
}
