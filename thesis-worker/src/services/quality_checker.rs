//! Post-generation validation
//!
//! Checks word count against the target, mandatory source coverage and
//! forbidden content. The report goes into job metadata; it never fails a job.

use crate::models::{QualityReport, ReferenceRecord};
use once_cell::sync::Lazy;
use regex::Regex;

struct ForbiddenPattern {
    label: &'static str,
    pattern: Regex,
}

static FORBIDDEN: Lazy<Vec<ForbiddenPattern>> = Lazy::new(|| {
    [
        ("Markdown image", r"!\[[^\]]*\]\([^)]*\)"),
        ("Markdown table", r"(?m)^\s*\|.*\|\s*$\n^\s*\|[\s:|-]*-[\s:|-]*\|\s*$"),
        ("HTML table", r"(?i)<table\b"),
        ("Table announcement", r"(?i)here is a table"),
        ("AI self-reference", r"(?i)\bas an ai\b"),
        ("Refusal", r"(?i)\bi cannot create\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| ForbiddenPattern {
        label,
        pattern: Regex::new(pattern).unwrap(),
    })
    .collect()
});

#[derive(Debug, Clone)]
pub struct QualityChecker {
    min_word_ratio: f64,
    max_word_ratio: f64,
}

impl QualityChecker {
    pub fn new(min_word_ratio: f64, max_word_ratio: f64) -> Self {
        Self {
            min_word_ratio,
            max_word_ratio,
        }
    }

    /// Validate a finished document
    ///
    /// `cited` is the subset of acquired references the text cites.
    pub fn check(
        &self,
        text: &str,
        word_count: usize,
        target_words: usize,
        mandatory_sources: &[String],
        cited: &[ReferenceRecord],
    ) -> QualityReport {
        let mut errors = Vec::new();

        let max_words = (target_words as f64 * self.max_word_ratio).floor() as usize;
        let min_words = (target_words as f64 * self.min_word_ratio).ceil() as usize;
        let within_limit = word_count <= max_words;
        if !within_limit {
            errors.push(format!(
                "Word count {} exceeds the limit of {} ({} target)",
                word_count, max_words, target_words
            ));
        }
        if word_count < min_words {
            errors.push(format!(
                "Word count {} is below the minimum of {} ({} target)",
                word_count, min_words, target_words
            ));
        }

        let missing = missing_mandatory_sources(text, mandatory_sources, cited);
        for source in &missing {
            errors.push(format!("Mandatory source not cited: {}", source));
        }

        for forbidden in FORBIDDEN.iter() {
            let hits = forbidden.pattern.find_iter(text).count();
            if hits > 0 {
                errors.push(format!("{} found ({} occurrences)", forbidden.label, hits));
            }
        }

        QualityReport {
            valid: errors.is_empty(),
            word_count,
            target_words,
            word_count_within_limit: within_limit,
            missing_mandatory_sources: missing,
            errors,
        }
    }
}

/// Mandatory sources that neither match a cited reference nor appear in the text
fn missing_mandatory_sources(
    text: &str,
    mandatory: &[String],
    cited: &[ReferenceRecord],
) -> Vec<String> {
    let lower = text.to_lowercase();
    mandatory
        .iter()
        .filter(|wanted| {
            let wanted_trimmed = wanted.trim();
            if wanted_trimmed.is_empty() {
                return false;
            }
            let by_reference = cited.iter().any(|r| r.matches_title_or_doi(wanted_trimmed));
            let by_text = lower.contains(&wanted_trimmed.to_lowercase());
            !(by_reference || by_text)
        })
        .cloned()
        .collect()
}
