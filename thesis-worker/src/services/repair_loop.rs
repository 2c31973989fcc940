//! Critique/patch repair loop
//!
//! ```text
//! Critiquing -> Checking -> Repairing -> Critiquing (verify) -> ... -> Done
//! ```
//!
//! The first critique pass fixes the master defect list; later passes only
//! verify it. At most `iterations` repair rounds run; whatever is left after
//! the last verification is reported, never raised.

use crate::models::defect::normalize_quote;
use crate::models::{CritiqueMode, DefectAudit, DefectReport, DocumentNode, DocumentTree, RepairSummary};
use crate::services::critique_engine::CritiqueEngine;
use crate::services::patch_engine::{PatchEngine, PatchStatus};
use crate::services::progress::{self, ProgressReporter};
use crate::services::prompts;
use crate::types::{GenerationRequest, GenerationTask, TextGenerator};
use crate::utils::{retry_with_backoff, RetryPolicy};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

static SECTION_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)*\b").unwrap());

const REPAIR_MAX_TOKENS: u32 = 4096;
const TITLE_SIMILARITY: f64 = 0.85;
/// Leading characters of a quote used when the full quote no longer matches
const QUOTE_HEAD_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Critiquing,
    Checking,
    Repairing,
    Done,
}

#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Maximum repair rounds
    pub iterations: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default)]
pub struct RepairOutcome {
    pub summary: RepairSummary,
    pub audits: Vec<DefectAudit>,
    /// Master list entries still open at the end
    pub remaining: Vec<DefectReport>,
}

pub struct RepairLoop {
    critique: CritiqueEngine,
    patcher: PatchEngine,
    generator: Arc<dyn TextGenerator>,
    config: RepairConfig,
    progress: Option<ProgressReporter>,
}

impl RepairLoop {
    pub fn new(
        critique: CritiqueEngine,
        patcher: PatchEngine,
        generator: Arc<dyn TextGenerator>,
        config: RepairConfig,
    ) -> Self {
        Self {
            critique,
            patcher,
            generator,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Drive critique and repair to convergence or the iteration bound
    pub async fn run(&self, tree: &mut DocumentTree) -> RepairOutcome {
        let mut state = RepairState::Critiquing;
        let mut outcome = RepairOutcome::default();
        let mut open: Vec<DefectReport> = Vec::new();
        let mut master_locked = false;
        let mut passes = 0;

        while state != RepairState::Done {
            state = match state {
                RepairState::Critiquing => {
                    passes += 1;
                    let mode = if master_locked {
                        open = self.critique.verify(tree, &open).await;
                        CritiqueMode::Verify
                    } else {
                        open = self.critique.analyze(tree).await;
                        outcome.summary.initial_defects = open.len();
                        master_locked = true;
                        CritiqueMode::Full
                    };
                    outcome.audits.push(DefectAudit {
                        iteration: passes,
                        mode,
                        defects: open.clone(),
                        chapters_patched: Vec::new(),
                        patches_rejected: 0,
                    });
                    RepairState::Checking
                }
                RepairState::Checking => {
                    if open.is_empty() {
                        debug!(passes, "No open defects");
                        RepairState::Done
                    } else if outcome.summary.iterations >= self.config.iterations {
                        RepairState::Done
                    } else {
                        RepairState::Repairing
                    }
                }
                RepairState::Repairing => {
                    outcome.summary.iterations += 1;
                    progress::report(
                        &self.progress,
                        "REPAIRING",
                        outcome.summary.iterations,
                        self.config.iterations,
                        format!("{} open defects", open.len()),
                    );
                    self.repair_round(tree, &open, &mut outcome).await;
                    RepairState::Critiquing
                }
                RepairState::Done => RepairState::Done,
            };
        }

        outcome.summary.remaining_defects = open.len();
        outcome.remaining = open;

        info!(
            iterations = outcome.summary.iterations,
            initial = outcome.summary.initial_defects,
            remaining = outcome.summary.remaining_defects,
            applied = outcome.summary.patches_applied,
            rejected = outcome.summary.patches_rejected,
            "Repair loop finished"
        );
        outcome
    }

    async fn repair_round(
        &self,
        tree: &mut DocumentTree,
        defects: &[DefectReport],
        outcome: &mut RepairOutcome,
    ) {
        let groups = group_by_section(tree, defects);

        let requests: Vec<(String, String, Vec<DefectReport>)> = groups
            .into_iter()
            .filter_map(|(id, defects)| {
                let content = tree.find(&id)?.content.clone();
                Some((id, content, defects))
            })
            .collect();

        let calls: Vec<_> = requests
            .into_iter()
            .map(|(id, content, defects)| {
                let generator = Arc::clone(&self.generator);
                let retry = self.config.retry;
                async move {
                    let reply = request_patch(generator, retry, &id, &content, &defects).await;
                    (id, content, reply)
                }
            })
            .collect();
        let replies: Vec<(String, String, Option<String>)> = stream::iter(calls)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut patched = Vec::new();
        let mut rejected = 0;

        for (id, content, reply) in replies {
            let Some(reply) = reply else {
                rejected += 1;
                continue;
            };
            let result = self.patcher.apply(&content, &reply);
            match result.status {
                PatchStatus::Applied | PatchStatus::Deleted => {
                    tree.set_content(&id, &result.text);
                    outcome.summary.patches_applied += result.applied.len().max(1);
                    patched.push(id);
                }
                _ => {
                    if let Some(e) = result.rejection() {
                        warn!(section = %id, error = %e, "Patch rejected");
                    }
                    rejected += 1;
                }
            }
        }

        patched.sort();
        outcome.summary.patches_rejected += rejected;
        if let Some(audit) = outcome.audits.last_mut() {
            audit.chapters_patched = patched;
            audit.patches_rejected = rejected;
        }
    }
}

/// Ask the generator for SEARCH/REPLACE blocks fixing `defects` in one section
async fn request_patch(
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    section_id: &str,
    content: &str,
    defects: &[DefectReport],
) -> Option<String> {
    let request = GenerationRequest::new(
        GenerationTask::Repair,
        prompts::repair_prompt(section_id, content, defects),
        REPAIR_MAX_TOKENS,
    );
    match retry_with_backoff("repair", retry, move || {
        let generator = Arc::clone(&generator);
        let request = request.clone();
        async move { generator.generate(request).await }
    })
    .await
    {
        Ok(reply) => Some(reply),
        Err(e) => {
            warn!(section = %section_id, error = %e, "Repair call failed");
            None
        }
    }
}

/// Group defects by the leaf that owns them, in document order
///
/// Unmapped defects are dropped with a warning.
pub fn group_by_section(
    tree: &DocumentTree,
    defects: &[DefectReport],
) -> Vec<(String, Vec<DefectReport>)> {
    let leaves: Vec<&DocumentNode> = tree
        .leaves()
        .into_iter()
        .filter(|n| !tree.is_placeholder(&n.id) && !n.content.is_empty())
        .collect();
    let normalized: Vec<String> = leaves.iter().map(|n| normalize_quote(&n.content)).collect();

    let mut groups: Vec<(String, Vec<DefectReport>)> = Vec::new();
    for defect in defects {
        let Some(owner) = map_defect(tree, &leaves, &normalized, defect) else {
            warn!(location = %defect.location, quote = %defect.quote, "Defect not mapped to any section, dropped");
            continue;
        };
        match groups.iter_mut().find(|(id, _)| *id == owner) {
            Some((_, list)) => list.push(defect.clone()),
            None => groups.push((owner, vec![defect.clone()])),
        }
    }

    let order: Vec<&str> = leaves.iter().map(|n| n.id.as_str()).collect();
    groups.sort_by_key(|(id, _)| order.iter().position(|o| *o == id.as_str()));
    groups
}

fn map_defect(
    tree: &DocumentTree,
    leaves: &[&DocumentNode],
    normalized: &[String],
    defect: &DefectReport,
) -> Option<String> {
    let quote = normalize_quote(&defect.quote);
    if !quote.is_empty() {
        if let Some(i) = normalized.iter().position(|text| text.contains(&quote)) {
            return Some(leaves[i].id.clone());
        }
        let head: String = quote.chars().take(QUOTE_HEAD_CHARS).collect();
        if let Some(i) = normalized.iter().position(|text| text.contains(&head)) {
            return Some(leaves[i].id.clone());
        }
    }

    // Outline id named in the location
    if let Some(m) = SECTION_ID.find(&defect.location) {
        if let Some(node) = tree.find(m.as_str()) {
            if let Some(id) = single_leaf(node, leaves) {
                return Some(id);
            }
        }
    }

    // Free-text chapter title
    let location = defect.location.trim().to_lowercase();
    if location.is_empty() {
        return None;
    }
    tree.walk()
        .into_iter()
        .map(|n| (n, strsim::jaro_winkler(&n.title.to_lowercase(), &location)))
        .filter(|(_, score)| *score >= TITLE_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .and_then(|(node, _)| single_leaf(node, leaves))
}

/// The node itself when it is a writable leaf, or its only writable leaf
fn single_leaf(node: &DocumentNode, leaves: &[&DocumentNode]) -> Option<String> {
    if node.is_leaf() {
        return leaves
            .iter()
            .any(|l| l.id == node.id)
            .then(|| node.id.clone());
    }
    let prefix = format!("{}.", node.id);
    let mut under = leaves.iter().filter(|l| l.id.starts_with(&prefix));
    match (under.next(), under.next()) {
        (Some(only), None) => Some(only.id.clone()),
        _ => None,
    }
}
