//! Chapter-level defect analysis
//!
//! The first pass analyzes every chapter and produces the master defect
//! list. Later passes only verify master entries: a defect whose quote no
//! longer appears in the document is resolved, the rest are re-checked by
//! the generator. Verification can only shrink the list.

use crate::models::defect::normalize_quote;
use crate::models::{DefectReport, DocumentNode, DocumentTree};
use crate::services::prompts;
use crate::types::{GenerationRequest, GenerationTask, TextGenerator};
use crate::utils::{extract_json, retry_with_backoff, RetryPolicy};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CRITIQUE_MAX_TOKENS: u32 = 4096;
const VERIFY_MAX_TOKENS: u32 = 512;

/// One top-level chapter rendered for analysis
#[derive(Debug, Clone)]
pub struct ChapterChunk {
    pub chapter_id: String,
    pub title: String,
    pub text: String,
}

impl ChapterChunk {
    fn from_node(node: &DocumentNode) -> Self {
        Self {
            chapter_id: node.id.clone(),
            title: node.title.clone(),
            text: node.render(),
        }
    }

    /// True when `defect` belongs to this chunk by quote or location
    fn owns(&self, defect: &DefectReport, normalized_text: &str) -> bool {
        let quote = normalize_quote(&defect.quote);
        if !quote.is_empty() && normalized_text.contains(&quote) {
            return true;
        }
        let location = defect.location.trim();
        location == self.chapter_id
            || location.starts_with(&format!("{}.", self.chapter_id))
            || (!self.title.is_empty() && location.eq_ignore_ascii_case(&self.title))
    }
}

/// Split a document into chapter chunks, skipping chapters without text
pub fn chapter_chunks(tree: &DocumentTree) -> Vec<ChapterChunk> {
    tree.chapters()
        .iter()
        .filter(|chapter| {
            let mut nodes = Vec::new();
            collect(chapter, &mut nodes);
            nodes.iter().any(|n| !n.content.trim().is_empty())
        })
        .map(ChapterChunk::from_node)
        .collect()
}

fn collect<'a>(node: &'a DocumentNode, out: &mut Vec<&'a DocumentNode>) {
    out.push(node);
    for child in &node.children {
        collect(child, out);
    }
}

#[derive(Clone)]
pub struct CritiqueEngine {
    generator: Arc<dyn TextGenerator>,
    concurrency: usize,
    min_quote_chars: usize,
    retry: RetryPolicy,
}

impl CritiqueEngine {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        concurrency: usize,
        min_quote_chars: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            concurrency: concurrency.max(1),
            min_quote_chars,
            retry,
        }
    }

    /// Full analysis of every chapter
    ///
    /// Reports without a usable quote are dropped; duplicates (same
    /// normalized quote) are reported once.
    pub async fn analyze(&self, tree: &DocumentTree) -> Vec<DefectReport> {
        let chunks = chapter_chunks(tree);

        let calls: Vec<_> = chunks
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, chunk)| {
                let engine = self.clone();
                async move { (i, engine.analyze_chunk(&chunk).await) }
            })
            .collect();
        let mut results: Vec<(usize, Vec<DefectReport>)> = stream::iter(calls)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        let mut seen = HashSet::new();
        let defects: Vec<DefectReport> = results
            .into_iter()
            .flat_map(|(_, defects)| defects)
            .filter(|d| seen.insert(d.key()))
            .collect();

        info!(chapters = chunks.len(), defects = defects.len(), "Critique pass finished");
        defects
    }

    async fn analyze_chunk(&self, chunk: &ChapterChunk) -> Vec<DefectReport> {
        let request = GenerationRequest::new(
            GenerationTask::Critique,
            prompts::critique_prompt(&chunk.text, self.min_quote_chars),
            CRITIQUE_MAX_TOKENS,
        );
        let reply = match self.call("critique", request).await {
            Some(reply) => reply,
            None => return Vec::new(),
        };

        let Some(entries) = extract_json::<Vec<serde_json::Value>>(&reply) else {
            warn!(chapter = %chunk.chapter_id, "Critique reply is not a JSON list, no defects taken");
            return Vec::new();
        };

        let total = entries.len();
        let defects: Vec<DefectReport> = entries
            .into_iter()
            .filter_map(|v| serde_json::from_value::<DefectReport>(v).ok())
            .filter(|d| d.has_usable_quote(self.min_quote_chars))
            .map(|mut d| {
                if d.location.trim().is_empty() {
                    d.location = chunk.chapter_id.clone();
                }
                d
            })
            .collect();

        debug!(
            chapter = %chunk.chapter_id,
            reported = total,
            kept = defects.len(),
            "Chapter analyzed"
        );
        defects
    }

    /// Subset of `open` still present in the document
    pub async fn verify(&self, tree: &DocumentTree, open: &[DefectReport]) -> Vec<DefectReport> {
        if open.is_empty() {
            return Vec::new();
        }

        let document = normalize_quote(&tree.reassemble());
        let chunks = chapter_chunks(tree);

        // Defects whose quote is gone are resolved without a call
        let mut pending: Vec<&DefectReport> = Vec::new();
        for defect in open {
            if document.contains(&normalize_quote(&defect.quote)) {
                pending.push(defect);
            } else {
                debug!(quote = %defect.quote, "Quote no longer present, defect resolved");
            }
        }

        let mut groups: Vec<(&ChapterChunk, Vec<&DefectReport>)> = Vec::new();
        let mut orphans: Vec<&DefectReport> = Vec::new();
        let normalized: Vec<String> = chunks.iter().map(|c| normalize_quote(&c.text)).collect();
        for defect in pending {
            match chunks
                .iter()
                .zip(&normalized)
                .position(|(chunk, text)| chunk.owns(defect, text))
            {
                Some(i) => match groups.iter_mut().find(|(c, _)| c.chapter_id == chunks[i].chapter_id) {
                    Some((_, list)) => list.push(defect),
                    None => groups.push((&chunks[i], vec![defect])),
                },
                None => orphans.push(defect),
            }
        }

        let calls: Vec<_> = groups
            .into_iter()
            .map(|(chunk, defects)| {
                let engine = self.clone();
                let chunk = chunk.clone();
                let defects: Vec<DefectReport> = defects.into_iter().cloned().collect();
                async move { engine.verify_chunk(&chunk, defects).await }
            })
            .collect();
        let verified: Vec<Vec<DefectReport>> = stream::iter(calls)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let still_present: HashSet<String> = verified
            .into_iter()
            .flatten()
            .chain(orphans.into_iter().cloned())
            .map(|d| d.key())
            .collect();

        // Preserve master order
        let remaining: Vec<DefectReport> = open
            .iter()
            .filter(|d| still_present.contains(&d.key()))
            .cloned()
            .collect();

        info!(
            checked = open.len(),
            remaining = remaining.len(),
            "Verification pass finished"
        );
        remaining
    }

    async fn verify_chunk(&self, chunk: &ChapterChunk, owned: Vec<DefectReport>) -> Vec<DefectReport> {
        let request = GenerationRequest::new(
            GenerationTask::Verify,
            prompts::verify_prompt(&chunk.text, &owned),
            VERIFY_MAX_TOKENS,
        );

        let numbers = match self.call("verify", request).await {
            Some(reply) => extract_json::<Vec<usize>>(&reply),
            None => None,
        };

        match numbers {
            Some(numbers) => {
                let wanted: HashSet<usize> = numbers.into_iter().collect();
                owned
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| wanted.contains(&(i + 1)))
                    .map(|(_, d)| d)
                    .collect()
            }
            None => {
                warn!(chapter = %chunk.chapter_id, "Verification unavailable, keeping defects open");
                owned
            }
        }
    }

    async fn call(&self, operation: &str, request: GenerationRequest) -> Option<String> {
        let generator = Arc::clone(&self.generator);
        match retry_with_backoff(operation, self.retry, move || {
            let generator = Arc::clone(&generator);
            let request = request.clone();
            async move { generator.generate(request).await }
        })
        .await
        {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(operation, error = %e, "Critique call failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutlineNode;

    fn tree() -> DocumentTree {
        let mut tree = DocumentTree::from_outline(&[
            OutlineNode::new("1", "Intro"),
            OutlineNode::new("2", "Body").with_children(vec![OutlineNode::new("2.1", "Detail")]),
            OutlineNode::new("3", "Empty"),
        ]);
        tree.set_content("1", "Opening text about remote work.");
        tree.set_content("2.1", "X happened in 1990 according to several sources.");
        tree
    }

    #[test]
    fn test_chunks_skip_empty_chapters() {
        let chunks = chapter_chunks(&tree());
        let ids: Vec<_> = chunks.iter().map(|c| c.chapter_id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert!(chunks[1].text.contains("### 2.1 Detail"));
    }

    #[test]
    fn test_chunk_ownership() {
        let chunks = chapter_chunks(&tree());
        let text = normalize_quote(&chunks[1].text);
        let by_quote = DefectReport::new("", "x happened   in 1990", "", "");
        let by_id = DefectReport::new("2.1", "something else entirely", "", "");
        let elsewhere = DefectReport::new("1", "something else entirely", "", "");
        assert!(chunks[1].owns(&by_quote, &text));
        assert!(chunks[1].owns(&by_id, &text));
        assert!(!chunks[1].owns(&elsewhere, &text));
    }
}
