//! Reference records and acquisition tasks

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// A candidate or acquired reference
///
/// Created by the ranker; later stages only attach `relevance_score`,
/// `page_start` and `page_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub title: String,

    /// Authors in publication order ("Surname, Given" or "Given Surname")
    #[serde(default)]
    pub authors: Vec<String>,

    pub year: Option<i32>,

    /// DOI or canonical title; dedup key after normalization
    pub external_id: String,

    #[serde(default)]
    pub doi: Option<String>,

    /// Direct URL of the full text, when known
    #[serde(default)]
    pub document_url: Option<String>,

    #[serde(default)]
    pub journal: Option<String>,

    #[serde(default)]
    pub abstract_text: Option<String>,

    /// Relevance to the thesis, 0-100
    #[serde(default)]
    pub relevance_score: Option<f64>,

    /// Top-level chapter id the record was found for
    #[serde(default)]
    pub chapter_affinity: Option<String>,

    #[serde(default)]
    pub mandatory: bool,

    #[serde(default)]
    pub page_start: Option<u32>,

    #[serde(default)]
    pub page_end: Option<u32>,
}

impl ReferenceRecord {
    /// Build a record keyed by DOI when present, otherwise by title
    pub fn new(title: impl Into<String>, authors: Vec<String>, year: Option<i32>) -> Self {
        let title = title.into();
        Self {
            external_id: title.clone(),
            title,
            authors,
            year,
            doi: None,
            document_url: None,
            journal: None,
            abstract_text: None,
            relevance_score: None,
            chapter_affinity: None,
            mandatory: false,
            page_start: None,
            page_end: None,
        }
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        let doi = doi.into();
        self.external_id = doi.clone();
        self.doi = Some(doi);
        self
    }

    pub fn with_document_url(mut self, url: impl Into<String>) -> Self {
        self.document_url = Some(url.into());
        self
    }

    pub fn with_affinity(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_affinity = Some(chapter_id.into());
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    /// Normalized dedup key
    pub fn dedup_key(&self) -> String {
        normalize_external_id(&self.external_id)
    }

    /// Relevance score, 0 when not yet scored
    pub fn relevance(&self) -> f64 {
        self.relevance_score.unwrap_or(0.0)
    }

    /// True when `wanted` (a title or DOI) names this record
    ///
    /// DOIs must match exactly after normalization; titles match on containment
    /// or a normalized Levenshtein similarity of at least 0.85.
    pub fn matches_title_or_doi(&self, wanted: &str) -> bool {
        let wanted = normalize_external_id(wanted);
        if wanted.is_empty() {
            return false;
        }
        if wanted.starts_with("10.") {
            return self.dedup_key() == wanted
                || self.doi.as_deref().map(normalize_external_id).as_deref() == Some(wanted.as_str());
        }
        let title = normalize_external_id(&self.title);
        if title.is_empty() {
            return false;
        }
        title.contains(&wanted)
            || wanted.contains(&title)
            || strsim::normalized_levenshtein(&title, &wanted) >= 0.85
    }

    /// Surname of the first author, used for citation matching
    pub fn first_author_surname(&self) -> Option<String> {
        self.authors.first().and_then(|a| author_surname(a))
    }
}

/// Extract a surname from "Surname, Given" or "Given Surname"
pub fn author_surname(author: &str) -> Option<String> {
    let author = author.trim();
    if author.is_empty() {
        return None;
    }
    if let Some((surname, _)) = author.split_once(',') {
        let surname = surname.trim();
        return (!surname.is_empty()).then(|| surname.to_string());
    }
    author.split_whitespace().last().map(|s| s.to_string())
}

/// Normalize a DOI or title into a dedup key
///
/// DOIs lose their resolver prefix and case; titles are lowercased with
/// punctuation dropped and whitespace collapsed.
pub fn normalize_external_id(id: &str) -> String {
    let lower = id.trim().to_lowercase();

    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .unwrap_or(&lower)
        .trim();

    if stripped.starts_with("10.") && stripped.contains('/') {
        return stripped.to_string();
    }

    stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A candidate owned by the acquisition pool, claimable exactly once
#[derive(Debug)]
pub struct AcquisitionTask {
    pub record: ReferenceRecord,
    used: AtomicBool,
}

impl AcquisitionTask {
    pub fn new(record: ReferenceRecord) -> Self {
        Self {
            record,
            used: AtomicBool::new(false),
        }
    }

    /// Mark the task used; returns false when another worker got there first
    pub fn try_claim(&self) -> bool {
        self.used
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }
}
