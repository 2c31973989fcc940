//! Search/replace patching of generated text
//!
//! Repair replies are patch blocks, never free-form rewrites. Each block's
//! search text is located with an explicit fallback chain:
//!
//! 1. `ExactMatch`: plain substring
//! 2. `NormalizedMatch`: same tokens, any whitespace between them
//! 3. `SubstringFuzzyMatch`: head and tail anchors located independently,
//!    everything between them replaced
//!
//! Unmatched blocks are skipped. A result that shrinks below
//! `safety_ratio` of the original is rejected as a whole unless the reply
//! was the delete marker.

use crate::error::PipelineError;
use crate::services::prompts::DELETE_MARKER;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

static CONFLICT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<{7}[ \t]*SEARCH[ \t]*\r?\n(.*?)\r?\n={7}[ \t]*\r?\n(.*?)\r?\n?>{7}[ \t]*REPLACE",
    )
    .unwrap()
});

/// Anchors shorter than this locate too much
const MIN_ANCHOR_CHARS: usize = 10;

/// Fuzzy spans may be at most this many times the search length
const MAX_FUZZY_SPAN_FACTOR: usize = 3;

/// One search/replace instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchBlock {
    pub search: String,
    pub replace: String,
}

/// How a block's search text was located
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    ExactMatch,
    NormalizedMatch,
    SubstringFuzzyMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchStatus {
    /// At least one block applied and the result passed the safety check
    Applied,
    /// The reply was the delete marker; the text is removed
    Deleted,
    /// The reply held no patch blocks
    NoBlocks,
    /// No block could be located
    NothingMatched,
    /// The result shrank implausibly; original kept
    Corrupted { original_len: usize, result_len: usize },
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub text: String,
    pub applied: Vec<MatchStrategy>,
    pub skipped: usize,
    pub status: PatchStatus,
}

impl PatchOutcome {
    fn unchanged(original: &str, skipped: usize, status: PatchStatus) -> Self {
        Self {
            text: original.to_string(),
            applied: Vec::new(),
            skipped,
            status,
        }
    }

    /// True when the text changed
    pub fn changed(&self) -> bool {
        matches!(self.status, PatchStatus::Applied | PatchStatus::Deleted)
    }

    /// Error view of a rejected patch
    pub fn rejection(&self) -> Option<PipelineError> {
        match &self.status {
            PatchStatus::Applied | PatchStatus::Deleted => None,
            PatchStatus::NoBlocks => Some(PipelineError::PatchMismatch(
                "reply contains no SEARCH/REPLACE block".to_string(),
            )),
            PatchStatus::NothingMatched => Some(PipelineError::PatchMismatch(format!(
                "none of {} search blocks found",
                self.skipped
            ))),
            PatchStatus::Corrupted {
                original_len,
                result_len,
            } => Some(PipelineError::PatchCorruption {
                original_len: *original_len,
                result_len: *result_len,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatchEngine {
    safety_ratio: f64,
    anchor_chars: usize,
}

impl PatchEngine {
    pub fn new(safety_ratio: f64, anchor_chars: usize) -> Self {
        Self {
            safety_ratio,
            anchor_chars,
        }
    }

    /// Apply a repair reply to `original`
    pub fn apply(&self, original: &str, patch_text: &str) -> PatchOutcome {
        let blocks = parse_blocks(patch_text);

        if blocks.is_empty() {
            if patch_text.contains(DELETE_MARKER) {
                debug!("Delete marker received");
                return PatchOutcome {
                    text: String::new(),
                    applied: Vec::new(),
                    skipped: 0,
                    status: PatchStatus::Deleted,
                };
            }
            warn!(reply_len = patch_text.len(), "Repair reply has no patch blocks, keeping original");
            return PatchOutcome::unchanged(original, 0, PatchStatus::NoBlocks);
        }

        let mut text = original.to_string();
        let mut applied = Vec::new();
        let mut skipped = 0;

        for block in &blocks {
            match self.locate(&text, &block.search) {
                Some((start, end, strategy)) => {
                    text.replace_range(start..end, &block.replace);
                    applied.push(strategy);
                }
                None => {
                    let preview: String = block.search.chars().take(60).collect();
                    debug!(search = %preview, "Patch block not found, skipping");
                    skipped += 1;
                }
            }
        }

        if applied.is_empty() {
            warn!(blocks = blocks.len(), "No patch block matched, keeping original");
            return PatchOutcome::unchanged(original, skipped, PatchStatus::NothingMatched);
        }

        let original_len = original.chars().count();
        let result_len = text.chars().count();
        if (result_len as f64) < original_len as f64 * self.safety_ratio {
            warn!(original_len, result_len, "Patch would shrink text implausibly, rejected");
            return PatchOutcome::unchanged(
                original,
                skipped,
                PatchStatus::Corrupted {
                    original_len,
                    result_len,
                },
            );
        }

        PatchOutcome {
            text,
            applied,
            skipped,
            status: PatchStatus::Applied,
        }
    }

    /// Byte range of `search` in `text`, first successful strategy wins
    fn locate(&self, text: &str, search: &str) -> Option<(usize, usize, MatchStrategy)> {
        if search.trim().is_empty() {
            return None;
        }
        if let Some(start) = text.find(search) {
            return Some((start, start + search.len(), MatchStrategy::ExactMatch));
        }
        if let Some((start, end)) = normalized_find(text, search) {
            return Some((start, end, MatchStrategy::NormalizedMatch));
        }
        self.fuzzy_find(text, search)
            .map(|(start, end)| (start, end, MatchStrategy::SubstringFuzzyMatch))
    }

    fn fuzzy_find(&self, text: &str, search: &str) -> Option<(usize, usize)> {
        let search = search.trim();
        let chars: Vec<char> = search.chars().collect();
        let anchor = self.anchor_chars.min(chars.len() / 2);
        if anchor < MIN_ANCHOR_CHARS {
            return None;
        }

        let head: String = chars[..anchor].iter().collect();
        let tail: String = chars[chars.len() - anchor..].iter().collect();

        let (head_start, head_end) = find_anchor(text, &head)?;
        let (_, tail_end) = find_anchor(&text[head_end..], &tail)?;
        let end = head_end + tail_end;

        if end - head_start > search.len() * MAX_FUZZY_SPAN_FACTOR {
            return None;
        }
        Some((head_start, end))
    }
}

fn find_anchor(text: &str, anchor: &str) -> Option<(usize, usize)> {
    text.find(anchor)
        .map(|start| (start, start + anchor.len()))
        .or_else(|| normalized_find(text, anchor))
}

/// Match the search tokens with any run of whitespace between them
fn normalized_find(text: &str, search: &str) -> Option<(usize, usize)> {
    let tokens: Vec<String> = search.split_whitespace().map(regex::escape).collect();
    if tokens.is_empty() {
        return None;
    }
    let pattern = Regex::new(&tokens.join(r"\s+")).ok()?;
    pattern.find(text).map(|m| (m.start(), m.end()))
}

/// Extract patch blocks from a reply
///
/// Accepts conflict-marker blocks (`<<<<<<< SEARCH` / `=======` /
/// `>>>>>>> REPLACE`) and the labelled form `SEARCH: ...` / `REPLACE: ...`.
pub fn parse_blocks(reply: &str) -> Vec<PatchBlock> {
    let blocks: Vec<PatchBlock> = CONFLICT_BLOCK
        .captures_iter(reply)
        .map(|caps| PatchBlock {
            search: caps[1].to_string(),
            replace: caps[2].to_string(),
        })
        .filter(|b| !b.search.trim().is_empty())
        .collect();
    if !blocks.is_empty() {
        return blocks;
    }
    parse_labelled_blocks(reply)
}

fn parse_labelled_blocks(reply: &str) -> Vec<PatchBlock> {
    reply
        .split("SEARCH:")
        .skip(1)
        .filter_map(|segment| {
            let (search, replace) = segment.split_once("REPLACE:")?;
            let search = search.trim().trim_end_matches('/').trim();
            let replace = replace.trim();
            (!search.is_empty()).then(|| PatchBlock {
                search: search.to_string(),
                replace: replace.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PatchEngine {
        PatchEngine::new(0.5, 40)
    }

    const CHAPTER: &str = "Early adoption was slow. X happened in 1990 and changed the field. \
                           Later studies confirmed the trend across several countries.";

    #[test]
    fn test_labelled_block_replaces_year() {
        let out = engine().apply(
            CHAPTER,
            "SEARCH: X happened in 1990\nREPLACE: X happened in 1991",
        );
        assert_eq!(out.status, PatchStatus::Applied);
        assert!(out.text.contains("X happened in 1991"));
        assert!(!out.text.contains("X happened in 1990"));
        assert_eq!(out.applied, vec![MatchStrategy::ExactMatch]);
    }

    #[test]
    fn test_conflict_block_form() {
        let reply = "<<<<<<< SEARCH\nX happened in 1990\n=======\nX happened in 1991\n>>>>>>> REPLACE";
        let out = engine().apply(CHAPTER, reply);
        assert!(out.text.contains("X happened in 1991 and changed"));
    }

    #[test]
    fn test_free_form_reply_rejected() {
        let out = engine().apply(CHAPTER, "Here is the corrected chapter: X happened in 1991.");
        assert_eq!(out.status, PatchStatus::NoBlocks);
        assert_eq!(out.text, CHAPTER);
        assert!(matches!(out.rejection(), Some(PipelineError::PatchMismatch(_))));
    }

    #[test]
    fn test_normalized_whitespace_match() {
        let reply = "SEARCH: X   happened\nin 1990\nREPLACE: X happened in 1991";
        let out = engine().apply(CHAPTER, reply);
        assert_eq!(out.applied, vec![MatchStrategy::NormalizedMatch]);
        assert!(out.text.contains("X happened in 1991 and changed"));
    }

    #[test]
    fn test_fuzzy_anchor_match() {
        let original = "Intro sentence here. The survey conducted across several European firms \
                        found that seventy percent of respondents preferred hybrid arrangements \
                        over full office presence in 2022. Closing remark.";
        let search = "The survey conducted across several European firms found that 70 percent \
                      of respondents preferred hybrid arrangements over full office presence in 2022.";
        let reply = format!(
            "<<<<<<< SEARCH\n{}\n=======\nThe survey conducted across European firms found that most \
             respondents preferred hybrid arrangements in 2022.\n>>>>>>> REPLACE",
            search
        );
        let out = engine().apply(original, &reply);
        assert_eq!(out.applied, vec![MatchStrategy::SubstringFuzzyMatch]);
        assert!(out
            .text
            .starts_with("Intro sentence here. The survey conducted across European firms"));
        assert!(out.text.ends_with("in 2022. Closing remark."));
        assert!(!out.text.contains("seventy"));
    }

    #[test]
    fn test_unmatched_block_skipped() {
        let reply = "SEARCH: not in the text at all\nREPLACE: whatever\n\
                     SEARCH: Early adoption was slow.\nREPLACE: Early adoption was gradual.";
        let out = engine().apply(CHAPTER, reply);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.applied.len(), 1);
        assert!(out.text.starts_with("Early adoption was gradual."));
    }

    #[test]
    fn test_nothing_matched_keeps_original() {
        let out = engine().apply(CHAPTER, "SEARCH: missing text here\nREPLACE: x");
        assert_eq!(out.status, PatchStatus::NothingMatched);
        assert_eq!(out.text, CHAPTER);
    }

    #[test]
    fn test_shrinking_patch_rejected() {
        let reply = format!("<<<<<<< SEARCH\n{}\n=======\nShort.\n>>>>>>> REPLACE", CHAPTER);
        let out = engine().apply(CHAPTER, &reply);
        assert!(matches!(out.status, PatchStatus::Corrupted { .. }));
        assert_eq!(out.text, CHAPTER);
        assert!(matches!(
            out.rejection(),
            Some(PipelineError::PatchCorruption { .. })
        ));
    }

    #[test]
    fn test_delete_marker() {
        let out = engine().apply(CHAPTER, DELETE_MARKER);
        assert_eq!(out.status, PatchStatus::Deleted);
        assert!(out.text.is_empty());
    }

    #[test]
    fn test_result_never_below_safety_ratio() {
        let engine = engine();
        let replies = [
            "SEARCH: Early adoption was slow.\nREPLACE: ",
            "SEARCH: Later studies confirmed the trend across several countries.\nREPLACE: ",
            "SEARCH: X happened in 1990 and changed the field.\nREPLACE: Y.",
        ];
        for reply in replies {
            let out = engine.apply(CHAPTER, reply);
            assert!(out.text.chars().count() as f64 >= CHAPTER.chars().count() as f64 * 0.5);
        }
    }
}
