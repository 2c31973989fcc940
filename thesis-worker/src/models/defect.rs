//! Defect reports produced by critique passes

use serde::{Deserialize, Serialize};

/// A problem found in generated text, anchored by a verbatim quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectReport {
    /// Outline id or free-text chapter title
    #[serde(default)]
    pub location: String,

    /// Verbatim excerpt of the defective text
    pub quote: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "fix", alias = "proposed_fix")]
    pub proposed_fix: String,
}

impl DefectReport {
    pub fn new(
        location: impl Into<String>,
        quote: impl Into<String>,
        description: impl Into<String>,
        proposed_fix: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            quote: quote.into(),
            description: description.into(),
            proposed_fix: proposed_fix.into(),
        }
    }

    /// Quotes shorter than `min_quote_chars` cannot anchor a patch reliably
    pub fn has_usable_quote(&self, min_quote_chars: usize) -> bool {
        self.quote.trim().chars().count() >= min_quote_chars
    }

    /// Identity used to match reports across iterations
    pub fn key(&self) -> String {
        normalize_quote(&self.quote)
    }
}

/// Collapse whitespace and lowercase, for quote containment checks
pub fn normalize_quote(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Which critique mode produced an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CritiqueMode {
    /// First pass: full analysis, result becomes the master list
    Full,
    /// Later passes: only re-check master list entries
    Verify,
}

/// One iteration's defect list, kept for the audit history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectAudit {
    pub iteration: usize,
    pub mode: CritiqueMode,
    pub defects: Vec<DefectReport>,
    pub chapters_patched: Vec<String>,
    pub patches_rejected: usize,
}
