//! Detectability-driven paragraph rewriting
//!
//! Each iteration scores the document, rewrites the paragraphs containing the
//! lowest-scoring flagged spans, and re-scores. The highest-scoring version
//! seen is what the loop returns. When the detector is unavailable the text
//! passes through unscored.

use crate::error::ServiceError;
use crate::models::defect::normalize_quote;
use crate::models::document_tree::strip_all_headings;
use crate::models::{count_words, DocumentTree, PipelineWarning, StyleSummary};
use crate::services::citations::{extract_markers, markers_preserved};
use crate::services::progress::{self, ProgressReporter};
use crate::services::prompts;
use crate::types::{
    DetectabilityReport, DetectabilityScorer, FlaggedSpan, GenerationRequest, GenerationTask,
    TextGenerator,
};
use crate::utils::{retry_with_backoff, RetryPolicy};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REWRITE_MAX_TOKENS: u32 = 2048;
/// Rewrites outside this word ratio of the original paragraph are rejected
const MIN_REWRITE_RATIO: f64 = 0.5;
const MAX_REWRITE_RATIO: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct StyleConfig {
    pub min_human_score: f64,
    pub iterations: usize,
    pub spans_per_iteration: usize,
    pub chunk_chars: usize,
    pub pause: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default)]
pub struct StyleOutcome {
    pub summary: StyleSummary,
    pub warnings: Vec<PipelineWarning>,
}

/// Paragraph address inside the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ParagraphRef {
    section_id: String,
    index: usize,
}

pub struct StyleConvergenceLoop {
    detector: Arc<dyn DetectabilityScorer>,
    generator: Arc<dyn TextGenerator>,
    config: StyleConfig,
    progress: Option<ProgressReporter>,
}

impl StyleConvergenceLoop {
    pub fn new(
        detector: Arc<dyn DetectabilityScorer>,
        generator: Arc<dyn TextGenerator>,
        config: StyleConfig,
    ) -> Self {
        Self {
            detector,
            generator,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Rewrite `tree` toward `min_human_score`; leaves the best version in place
    pub async fn run(&self, tree: &mut DocumentTree, language: &str) -> StyleOutcome {
        let mut outcome = StyleOutcome::default();
        let threshold = self.config.min_human_score;

        let initial = match self.score_document(tree).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Detector unavailable, passing text through unscored");
                outcome.warnings.push(PipelineWarning::DetectorUnavailable {
                    reason: e.to_string(),
                });
                return outcome;
            }
        };

        outcome.summary.initial_score = Some(initial.score);
        outcome.summary.final_score = Some(initial.score);
        if initial.score >= threshold {
            info!(score = initial.score, threshold, "Detectability threshold already met");
            return outcome;
        }

        let mut best_score = initial.score;
        let mut best_tree = tree.clone();
        let mut current = tree.clone();
        let mut report = initial;

        for iteration in 1..=self.config.iterations {
            let targets = locate_paragraphs(&current, &lowest_spans(&report, self.config.spans_per_iteration));
            if targets.is_empty() {
                debug!(iteration, "No flagged span maps to a paragraph, stopping");
                break;
            }

            for target in &targets {
                if self.rewrite_paragraph(&mut current, target, language).await {
                    outcome.summary.rewrites_accepted += 1;
                } else {
                    outcome.summary.rewrites_rejected += 1;
                }
            }
            outcome.summary.iterations = iteration;

            report = match self.score_document(&current).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(iteration, error = %e, "Detector failed mid-loop, keeping best version");
                    break;
                }
            };
            outcome.summary.history.push(report.score);
            info!(iteration, score = report.score, best = best_score, "Style iteration scored");

            progress::report(
                &self.progress,
                "HUMANIZING",
                iteration,
                self.config.iterations,
                format!("score {:.1} (target {:.1})", report.score, threshold),
            );

            if report.score > best_score {
                best_score = report.score;
                best_tree = current.clone();
            }
            if report.score >= threshold {
                break;
            }
            if iteration < self.config.iterations && !self.config.pause.is_zero() {
                tokio::time::sleep(self.config.pause).await;
            }
        }

        *tree = best_tree;
        outcome.summary.final_score = Some(best_score);
        if best_score < threshold {
            outcome.warnings.push(PipelineWarning::StyleThresholdNotReached {
                best_score,
                threshold,
            });
        }
        outcome
    }

    /// Score the whole document, chunked; the score is length-weighted
    async fn score_document(&self, tree: &DocumentTree) -> Result<DetectabilityReport, ServiceError> {
        let text = tree.reassemble();
        let chunks = chunk_text(&text, self.config.chunk_chars);
        if chunks.is_empty() {
            return Err(ServiceError::InvalidInput("document is empty".to_string()));
        }

        let mut weighted = 0.0;
        let mut total = 0usize;
        let mut spans = Vec::new();
        for chunk in &chunks {
            let detector = Arc::clone(&self.detector);
            let owned_chunk = chunk.clone();
            let report = retry_with_backoff("detectability scoring", self.config.retry, move || {
                let detector = Arc::clone(&detector);
                let chunk = owned_chunk.clone();
                async move { detector.score(&chunk).await }
            })
            .await?;
            let len = chunk.chars().count();
            weighted += report.score * len as f64;
            total += len;
            spans.extend(report.flagged_spans);
        }

        Ok(DetectabilityReport {
            score: weighted / total.max(1) as f64,
            flagged_spans: spans,
        })
    }

    /// Rewrite one paragraph in place; returns whether the rewrite was kept
    async fn rewrite_paragraph(
        &self,
        tree: &mut DocumentTree,
        target: &ParagraphRef,
        language: &str,
    ) -> bool {
        let Some(node) = tree.find(&target.section_id) else {
            return false;
        };
        let mut paragraphs = split_paragraphs(&node.content);
        let Some(original) = paragraphs.get(target.index).cloned() else {
            return false;
        };

        let request = GenerationRequest::new(
            GenerationTask::Rewrite,
            prompts::rewrite_prompt(&original, &extract_markers(&original), language),
            REWRITE_MAX_TOKENS,
        );
        let generator = Arc::clone(&self.generator);
        let reply = retry_with_backoff("paragraph rewrite", self.config.retry, move || {
            let generator = Arc::clone(&generator);
            let request = request.clone();
            async move { generator.generate(request).await }
        })
        .await;

        let rewritten = match reply {
            Ok(text) => strip_all_headings(&text),
            Err(e) => {
                warn!(section = %target.section_id, error = %e, "Rewrite call failed");
                return false;
            }
        };

        if let Err(reason) = check_rewrite(&original, &rewritten) {
            debug!(section = %target.section_id, paragraph = target.index, reason, "Rewrite rejected");
            return false;
        }

        paragraphs[target.index] = rewritten;
        tree.set_content(&target.section_id, &paragraphs.join("\n\n"))
    }
}

/// Reasons a rewrite cannot replace its paragraph
fn check_rewrite(original: &str, rewritten: &str) -> Result<(), &'static str> {
    if rewritten.trim().is_empty() {
        return Err("empty rewrite");
    }
    if rewritten.contains("\n\n") {
        return Err("rewrite spans several paragraphs");
    }
    if !markers_preserved(original, rewritten) {
        return Err("citation markers changed");
    }
    let ratio = count_words(rewritten) as f64 / count_words(original).max(1) as f64;
    if !(MIN_REWRITE_RATIO..=MAX_REWRITE_RATIO).contains(&ratio) {
        return Err("length changed too much");
    }
    Ok(())
}

/// The `n` lowest-scoring flagged spans
fn lowest_spans(report: &DetectabilityReport, n: usize) -> Vec<FlaggedSpan> {
    let mut spans = report.flagged_spans.clone();
    spans.sort_by(|a, b| a.score.total_cmp(&b.score));
    spans.truncate(n);
    spans
}

/// Paragraphs containing the given spans, without duplicates or placeholders
fn locate_paragraphs(tree: &DocumentTree, spans: &[FlaggedSpan]) -> Vec<ParagraphRef> {
    let leaves: Vec<(String, Vec<String>)> = tree
        .leaves()
        .into_iter()
        .filter(|n| !tree.is_placeholder(&n.id))
        .map(|n| {
            let normalized = split_paragraphs(&n.content)
                .iter()
                .map(|p| normalize_quote(p))
                .collect();
            (n.id.clone(), normalized)
        })
        .collect();

    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for span in spans {
        let needle = normalize_quote(&span.text);
        if needle.is_empty() {
            continue;
        }
        let found = leaves.iter().find_map(|(id, paragraphs)| {
            paragraphs
                .iter()
                .position(|p| p.contains(&needle))
                .map(|index| ParagraphRef {
                    section_id: id.clone(),
                    index,
                })
        });
        match found {
            Some(r) if seen.insert(r.clone()) => refs.push(r),
            Some(_) => {}
            None => debug!(span = %span.text, "Flagged span not found in any paragraph"),
        }
    }
    refs
}

fn split_paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split at paragraph boundaries into chunks of at most `max_chars`
///
/// A single paragraph longer than `max_chars` is cut at character boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
        let len = paragraph.chars().count();
        if len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = paragraph.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() { len } else { len + 2 };
        if current.chars().count() + needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutlineNode;

    #[test]
    fn test_chunk_text_respects_bound() {
        let text = "aaaa\n\nbbbb\n\ncccc\n\n".to_string() + &"d".repeat(25);
        let chunks = chunk_text(&text, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0], "aaaa\n\nbbbb");
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn test_rewrite_checks() {
        let original = "Hybrid work improved output (Smith, 2019, p. 4) in most firms studied.";
        assert!(check_rewrite(original, "In most firms studied, hybrid work raised output (Smith, 2019, p. 4).").is_ok());
        assert_eq!(
            check_rewrite(original, "In most firms studied, hybrid work raised output a lot."),
            Err("citation markers changed")
        );
        assert_eq!(check_rewrite(original, "  "), Err("empty rewrite"));
    }

    #[test]
    fn test_locate_paragraphs() {
        let mut tree = DocumentTree::from_outline(&[
            OutlineNode::new("1", "Intro"),
            OutlineNode::new("2", "Body"),
        ]);
        tree.set_content("1", "First paragraph here.\n\nSecond paragraph with a flagged sentence.");
        tree.set_content("2", &DocumentTree::placeholder("2"));

        let spans = vec![
            FlaggedSpan { text: "with a  flagged sentence".into(), score: 10.0 },
            FlaggedSpan { text: "Second paragraph".into(), score: 20.0 },
            FlaggedSpan { text: "generation-failed".into(), score: 5.0 },
        ];
        let refs = locate_paragraphs(&tree, &spans);
        assert_eq!(
            refs,
            vec![ParagraphRef { section_id: "1".into(), index: 1 }]
        );
    }

    #[test]
    fn test_lowest_spans_first() {
        let report = DetectabilityReport {
            score: 40.0,
            flagged_spans: vec![
                FlaggedSpan { text: "b".into(), score: 30.0 },
                FlaggedSpan { text: "a".into(), score: 5.0 },
                FlaggedSpan { text: "c".into(), score: 60.0 },
            ],
        };
        let spans = lowest_spans(&report, 2);
        assert_eq!(spans[0].text, "a");
        assert_eq!(spans[1].text, "b");
    }
}
