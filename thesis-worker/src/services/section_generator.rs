//! Word-budgeted section generation with rolling context
//!
//! Leaves are written strictly in outline order. Each leaf sees a bounded
//! digest of the leaves before it (topics, terms, claims) and the titles of
//! the next few leaves, never raw prior text.

use crate::models::document_tree::{strip_all_headings, strip_outline_headings};
use crate::models::{
    count_words, DocumentTree, OutlineNode, PipelineWarning, ReferenceRecord, ThesisSpec,
};
use crate::services::progress::{self, ProgressReporter};
use crate::services::prompts::{self, SectionPrompt};
use crate::types::{GenerationRequest, GenerationTask, TextGenerator};
use crate::utils::{extract_json, retry_with_backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_SOURCES_PER_SECTION: usize = 12;
const SUMMARY_MAX_TOKENS: u32 = 1024;
const MIN_SECTION_TOKENS: u32 = 1024;
const MAX_SECTION_TOKENS: u32 = 8192;
const DIGEST_LIST_LIMIT: usize = 5;

/// Split `target` words over the outline
///
/// Each wrapper's budget is split evenly among its children, remainder going
/// to the earliest ones. Only leaves appear in the result; the leaf budgets
/// sum to `target`.
pub fn compute_word_budgets(outline: &[OutlineNode], target: usize) -> HashMap<String, usize> {
    let mut budgets = HashMap::new();
    distribute(outline, target, &mut budgets);
    budgets
}

fn distribute(nodes: &[OutlineNode], budget: usize, out: &mut HashMap<String, usize>) {
    if nodes.is_empty() {
        return;
    }
    let share = budget / nodes.len();
    let remainder = budget % nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        let node_budget = share + usize::from(i < remainder);
        if node.is_leaf() {
            out.insert(node.id.clone(), node_budget);
        } else {
            distribute(&node.children, node_budget, out);
        }
    }
}

/// Digest of one written leaf
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionDigest {
    #[serde(default)]
    pub section_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub claims: Vec<String>,
}

impl SectionDigest {
    fn render(&self) -> String {
        let mut line = format!("{} {}:", self.section_id, self.title);
        if !self.topics.is_empty() {
            line.push_str(&format!(" topics: {};", self.topics.join(", ")));
        }
        if !self.terms.is_empty() {
            line.push_str(&format!(" terms: {};", self.terms.join(", ")));
        }
        if !self.claims.is_empty() {
            line.push_str(&format!(" claims: {}", self.claims.join(" | ")));
        }
        line
    }

    /// Digest built without a generation call
    ///
    /// Topic is the title, claims are the first sentences of the text.
    fn heuristic(leaf: &OutlineNode, content: &str) -> Self {
        let claims = content
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| count_words(s) >= 4)
            .take(2)
            .map(|s| s.chars().take(200).collect())
            .collect();
        Self {
            section_id: leaf.id.clone(),
            title: leaf.title.clone(),
            topics: vec![leaf.title.clone()],
            terms: Vec::new(),
            claims,
        }
    }
}

/// Append-only digest list bounded in rendered size
///
/// The oldest digests are dropped once the rendering exceeds `max_chars`.
#[derive(Debug, Clone)]
pub struct RollingContext {
    digests: VecDeque<SectionDigest>,
    max_chars: usize,
}

impl RollingContext {
    pub fn new(max_chars: usize) -> Self {
        Self {
            digests: VecDeque::new(),
            max_chars,
        }
    }

    pub fn push(&mut self, digest: SectionDigest) {
        self.digests.push_back(digest);
        while self.digests.len() > 1 && self.rendered_len() > self.max_chars {
            self.digests.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    fn rendered_len(&self) -> usize {
        self.digests.iter().map(|d| d.render().len() + 1).sum()
    }

    /// Rendered digest, never longer than `max_chars` characters
    pub fn render(&self) -> String {
        let text = self
            .digests
            .iter()
            .map(|d| d.render())
            .collect::<Vec<_>>()
            .join("\n");
        if text.chars().count() <= self.max_chars {
            text
        } else {
            text.chars().take(self.max_chars).collect()
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub attempts: usize,
    pub min_word_ratio: f64,
    pub rolling_context_chars: usize,
    pub upcoming_preview_count: usize,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    Complete,
    /// Text accepted below the minimum word ratio
    Shortfall,
    /// Nothing produced; the leaf holds a placeholder
    Failed,
}

#[derive(Debug, Clone)]
pub struct SectionOutcome {
    pub section_id: String,
    pub content: String,
    pub budget: usize,
    pub words: usize,
    pub attempts: usize,
    pub status: SectionStatus,
}

#[derive(Debug, Default)]
pub struct GenerationReport {
    pub sections: Vec<SectionOutcome>,
    pub warnings: Vec<PipelineWarning>,
}

impl GenerationReport {
    pub fn generated(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.status != SectionStatus::Failed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.sections.len() - self.generated()
    }

    /// True when every leaf ended as a placeholder
    pub fn all_failed(&self) -> bool {
        !self.sections.is_empty() && self.generated() == 0
    }
}

pub struct SectionGenerator {
    generator: Arc<dyn TextGenerator>,
    config: GenerationConfig,
    progress: Option<ProgressReporter>,
}

impl SectionGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: GenerationConfig) -> Self {
        Self {
            generator,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Write every leaf of `spec.outline` into `tree`
    ///
    /// Wrapper nodes keep empty bodies and render as bare headings.
    pub async fn generate_document(
        &self,
        spec: &ThesisSpec,
        tree: &mut DocumentTree,
        sources: &[ReferenceRecord],
        target_words: usize,
    ) -> GenerationReport {
        let budgets = compute_word_budgets(&spec.outline, target_words);
        let leaves = spec.leaves();
        let mut context = RollingContext::new(self.config.rolling_context_chars);
        let mut report = GenerationReport::default();

        info!(leaves = leaves.len(), target_words, sources = sources.len(), "Generating sections");

        for (i, leaf) in leaves.iter().enumerate() {
            let budget = budgets.get(&leaf.id).copied().unwrap_or(0);
            let upcoming: Vec<&OutlineNode> = leaves
                .iter()
                .skip(i + 1)
                .take(self.config.upcoming_preview_count)
                .copied()
                .collect();
            let leaf_sources = sources_for(leaf, sources);

            let outcome = self
                .generate_leaf(spec, leaf, budget, &leaf_sources, &upcoming, &context)
                .await;

            tree.set_content(&leaf.id, &outcome.content);

            match outcome.status {
                SectionStatus::Complete => {}
                SectionStatus::Shortfall => report.warnings.push(PipelineWarning::WordBudgetShortfall {
                    section_id: leaf.id.clone(),
                    budget,
                    written: outcome.words,
                }),
                SectionStatus::Failed => report.warnings.push(PipelineWarning::SectionGenerationFailed {
                    section_id: leaf.id.clone(),
                }),
            }

            if outcome.status != SectionStatus::Failed {
                let digest = self.summarize(leaf, &outcome.content).await;
                context.push(digest);
            }

            progress::report(
                &self.progress,
                "GENERATING",
                i + 1,
                leaves.len(),
                format!("Section {} ({} words)", leaf.id, outcome.words),
            );
            report.sections.push(outcome);
        }

        info!(
            generated = report.generated(),
            failed = report.failed(),
            words = tree.word_count(),
            "Section generation finished"
        );
        report
    }

    /// Generate one leaf, appending continuations until the budget is met
    pub async fn generate_leaf(
        &self,
        spec: &ThesisSpec,
        leaf: &OutlineNode,
        budget: usize,
        sources: &[ReferenceRecord],
        upcoming: &[&OutlineNode],
        context: &RollingContext,
    ) -> SectionOutcome {
        let min_words = (budget as f64 * self.config.min_word_ratio).ceil() as usize;
        let mut content = String::new();
        let mut attempts = 0;

        while attempts < self.config.attempts {
            attempts += 1;
            let written_words = count_words(&content);

            let prompt = prompts::section_prompt(&SectionPrompt {
                spec,
                leaf,
                budget,
                sources,
                upcoming,
                written_words,
            });
            let mut request =
                GenerationRequest::new(GenerationTask::Section, prompt, section_max_tokens(budget))
                    .grounded();
            if !context.is_empty() {
                request = request.with_context(context.render());
            }

            let generator = Arc::clone(&self.generator);
            let reply = retry_with_backoff("section generation", self.config.retry, move || {
                let generator = Arc::clone(&generator);
                let request = request.clone();
                async move { generator.generate(request).await }
            })
            .await;

            let text = match reply {
                Ok(text) if written_words == 0 => strip_outline_headings(&text),
                Ok(text) => strip_all_headings(&text),
                Err(e) => {
                    warn!(section = %leaf.id, attempt = attempts, error = %e, "Section generation call failed");
                    continue;
                }
            };

            if !text.is_empty() {
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                content.push_str(&text);
            }

            let words = count_words(&content);
            debug!(section = %leaf.id, attempt = attempts, words, budget, "Section attempt");
            if words >= min_words && words > 0 {
                break;
            }
        }

        let words = count_words(&content);
        let status = if words == 0 {
            warn!(section = %leaf.id, attempts, "No text generated, inserting placeholder");
            content = DocumentTree::placeholder(&leaf.id);
            SectionStatus::Failed
        } else if words < min_words {
            SectionStatus::Shortfall
        } else {
            SectionStatus::Complete
        };

        SectionOutcome {
            section_id: leaf.id.clone(),
            content,
            budget,
            words: if status == SectionStatus::Failed { 0 } else { words },
            attempts,
            status,
        }
    }

    /// Digest a written leaf for the rolling context
    async fn summarize(&self, leaf: &OutlineNode, content: &str) -> SectionDigest {
        let request = GenerationRequest::new(
            GenerationTask::Summary,
            prompts::summary_prompt(leaf, content),
            SUMMARY_MAX_TOKENS,
        );
        let generator = Arc::clone(&self.generator);
        let reply = retry_with_backoff("section summary", self.config.retry, move || {
            let generator = Arc::clone(&generator);
            let request = request.clone();
            async move { generator.generate(request).await }
        })
        .await;

        let parsed = match reply {
            Ok(text) => extract_json::<SectionDigest>(&text),
            Err(e) => {
                debug!(section = %leaf.id, error = %e, "Summary call failed");
                None
            }
        };

        match parsed {
            Some(mut digest) => {
                digest.section_id = leaf.id.clone();
                digest.title = leaf.title.clone();
                digest.topics.truncate(DIGEST_LIST_LIMIT);
                digest.terms.truncate(DIGEST_LIST_LIMIT);
                digest.claims.truncate(DIGEST_LIST_LIMIT);
                digest
            }
            None => SectionDigest::heuristic(leaf, content),
        }
    }
}

fn section_max_tokens(budget: usize) -> u32 {
    let tokens = (budget as u64).saturating_mul(2).min(u64::from(MAX_SECTION_TOKENS)) as u32;
    tokens.max(MIN_SECTION_TOKENS)
}

/// Sources for one leaf: its chapter's records first, then the rest
fn sources_for(leaf: &OutlineNode, sources: &[ReferenceRecord]) -> Vec<ReferenceRecord> {
    let chapter = leaf.id.split('.').next().unwrap_or(&leaf.id);
    let (mut own, rest): (Vec<_>, Vec<_>) = sources
        .iter()
        .cloned()
        .partition(|r| r.chapter_affinity.as_deref() == Some(chapter) || r.mandatory);
    own.extend(rest);
    own.truncate(MAX_SOURCES_PER_SECTION);
    own
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_outline() -> Vec<OutlineNode> {
        vec![
            OutlineNode::new("1", "Intro"),
            OutlineNode::new("2", "Body").with_children(vec![
                OutlineNode::new("2.1", "First"),
                OutlineNode::new("2.2", "Second"),
            ]),
        ]
    }

    #[test]
    fn test_budgets_split_evenly() {
        let budgets = compute_word_budgets(&scenario_outline(), 1000);
        assert_eq!(budgets["1"], 500);
        assert_eq!(budgets["2.1"], 250);
        assert_eq!(budgets["2.2"], 250);
        assert!(!budgets.contains_key("2"), "wrappers get no budget");
    }

    #[test]
    fn test_budgets_sum_to_target() {
        let outline = vec![
            OutlineNode::new("1", "A"),
            OutlineNode::new("2", "B").with_children(vec![
                OutlineNode::new("2.1", "B1"),
                OutlineNode::new("2.2", "B2"),
                OutlineNode::new("2.3", "B3"),
            ]),
            OutlineNode::new("3", "C"),
        ];
        let budgets = compute_word_budgets(&outline, 1001);
        assert_eq!(budgets.values().sum::<usize>(), 1001);
        // 1001 / 3 = 333 r 2: chapters 1 and 2 get the extra word
        assert_eq!(budgets["1"], 334);
        assert_eq!(budgets["3"], 333);
        assert_eq!(budgets["2.1"], 112);
        assert_eq!(budgets["2.3"], 111);
    }

    #[test]
    fn test_rolling_context_bounded() {
        let mut context = RollingContext::new(120);
        for i in 0..10 {
            context.push(SectionDigest {
                section_id: i.to_string(),
                title: format!("Section {}", i),
                topics: vec!["a fairly long topic description".to_string()],
                ..Default::default()
            });
        }
        assert!(context.render().chars().count() <= 120);
        assert!(context.len() < 10);
        assert!(context.render().contains("9 Section 9"));
    }

    #[test]
    fn test_heuristic_digest() {
        let leaf = OutlineNode::new("1", "Intro");
        let digest = SectionDigest::heuristic(
            &leaf,
            "Remote work grew sharply after 2020. Short. Firms adopted hybrid policies quickly.",
        );
        assert_eq!(digest.topics, vec!["Intro"]);
        assert_eq!(digest.claims.len(), 2);
    }

    #[test]
    fn test_sources_prefer_chapter() {
        let leaf = OutlineNode::new("2.1", "x");
        let sources = vec![
            ReferenceRecord::new("other", vec![], None).with_affinity("1"),
            ReferenceRecord::new("own", vec![], None).with_affinity("2"),
        ];
        let picked = sources_for(&leaf, &sources);
        assert_eq!(picked[0].title, "own");
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_section_tokens_bounds() {
        assert_eq!(section_max_tokens(10), MIN_SECTION_TOKENS);
        assert_eq!(section_max_tokens(100_000), MAX_SECTION_TOKENS);
        assert_eq!(section_max_tokens(2000), 4000);
    }
}
