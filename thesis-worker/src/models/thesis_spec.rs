//! Thesis specification and outline tree
//!
//! The submission surface receives outlines in two JSON shapes. Both are turned
//! into the strict `OutlineNode` tree at deserialization time and validated once
//! by `ThesisSpec::validate()`; nothing downstream re-checks the outline.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Citation styles supported by bibliography formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CitationStyle {
    Apa,
    Harvard,
    Mla,
    DeutscheZitierweise,
}

impl CitationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStyle::Apa => "apa",
            CitationStyle::Harvard => "harvard",
            CitationStyle::Mla => "mla",
            CitationStyle::DeutscheZitierweise => "deutsche-zitierweise",
        }
    }

    /// Footnote-based styles put citations in `[^N]` markers instead of parentheses
    pub fn uses_footnotes(&self) -> bool {
        matches!(self, CitationStyle::DeutscheZitierweise)
    }
}

/// Unit of `target_length`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    Words,
    Pages,
}

/// Outline validation failures
#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Outline must contain at least one chapter")]
    EmptyOutline,

    #[error("Target length must be greater than zero")]
    ZeroTarget,

    #[error("Outline id '{0}' is not a dotted numeric path")]
    MalformedId(String),

    #[error("Outline id '{0}' appears more than once")]
    DuplicateId(String),

    #[error("Outline id '{child}' does not extend parent id '{parent}' by one segment")]
    NotChildOf { parent: String, child: String },

    #[error("Outline id '{later}' does not sort after sibling '{earlier}'")]
    SiblingOrder { earlier: String, later: String },
}

/// Immutable description of the document to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThesisSpec {
    pub title: String,

    #[serde(default)]
    pub field: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub thesis_type: String,

    #[serde(default)]
    pub research_question: String,

    pub citation_style: CitationStyle,

    /// Target length in `length_unit`
    #[serde(alias = "targetWordCount")]
    pub target_length: usize,

    #[serde(default)]
    pub length_unit: LengthUnit,

    pub outline: Vec<OutlineNode>,

    /// Titles or DOIs that must be acquired and cited
    #[serde(default)]
    pub mandatory_sources: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl ThesisSpec {
    /// Target length converted to words
    pub fn target_word_count(&self, words_per_page: usize) -> usize {
        match self.length_unit {
            LengthUnit::Words => self.target_length,
            LengthUnit::Pages => self.target_length * words_per_page,
        }
    }

    /// Validate the specification once at ingestion
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.title.trim().is_empty() {
            return Err(SpecError::EmptyTitle);
        }
        if self.outline.is_empty() {
            return Err(SpecError::EmptyOutline);
        }
        if self.target_length == 0 {
            return Err(SpecError::ZeroTarget);
        }

        let mut seen = HashSet::new();
        validate_level(&self.outline, None, &mut seen)
    }

    /// Leaves of the outline in document order
    pub fn leaves(&self) -> Vec<&OutlineNode> {
        let mut out = Vec::new();
        for node in &self.outline {
            node.collect_leaves(&mut out);
        }
        out
    }
}

fn validate_level(
    nodes: &[OutlineNode],
    parent: Option<&[u32]>,
    seen: &mut HashSet<String>,
) -> Result<(), SpecError> {
    let mut previous: Option<(Vec<u32>, &str)> = None;

    for node in nodes {
        let segments =
            parse_id(&node.id).ok_or_else(|| SpecError::MalformedId(node.id.clone()))?;

        if !seen.insert(node.id.clone()) {
            return Err(SpecError::DuplicateId(node.id.clone()));
        }

        let expected_depth = parent.map(|p| p.len() + 1).unwrap_or(1);
        let extends_parent = parent
            .map(|p| segments.starts_with(p))
            .unwrap_or(true);
        if segments.len() != expected_depth || !extends_parent {
            return Err(SpecError::NotChildOf {
                parent: parent.map(join_id).unwrap_or_default(),
                child: node.id.clone(),
            });
        }

        if let Some((prev, prev_id)) = &previous {
            if segments <= *prev {
                return Err(SpecError::SiblingOrder {
                    earlier: prev_id.to_string(),
                    later: node.id.clone(),
                });
            }
        }

        validate_level(&node.children, Some(&segments), seen)?;
        previous = Some((segments, node.id.as_str()));
    }

    Ok(())
}

/// Parse a dotted numeric id ("2.1") into its segments
pub fn parse_id(id: &str) -> Option<Vec<u32>> {
    if id.is_empty() {
        return None;
    }
    id.split('.')
        .map(|seg| {
            if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                seg.parse().ok()
            }
        })
        .collect()
}

fn join_id(segments: &[u32]) -> String {
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// One node of the outline tree
///
/// Nodes with children are wrappers: they get a heading but no budget and no
/// generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOutlineNode")]
pub struct OutlineNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<OutlineNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a OutlineNode>) {
        if self.is_leaf() {
            out.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }
}

/// Wire shape accepted for outline nodes: strict `{id,title,children}` or
/// loose `{number,title,sections|subsections}`
#[derive(Deserialize)]
struct RawOutlineNode {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    number: Option<serde_json::Value>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    children: Option<Vec<RawOutlineNode>>,
    #[serde(default)]
    sections: Option<Vec<RawOutlineNode>>,
    #[serde(default)]
    subsections: Option<Vec<RawOutlineNode>>,
}

impl TryFrom<RawOutlineNode> for OutlineNode {
    type Error = String;

    fn try_from(raw: RawOutlineNode) -> Result<Self, Self::Error> {
        let id_value = raw
            .id
            .or(raw.number)
            .ok_or_else(|| format!("outline node '{}' has no id or number", raw.title))?;

        let id = match id_value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(format!("outline id must be a string or number, got {}", other)),
        };
        let id = id.trim().trim_end_matches('.').to_string();

        let children = raw
            .children
            .or(raw.sections)
            .or(raw.subsections)
            .unwrap_or_default()
            .into_iter()
            .map(OutlineNode::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OutlineNode {
            id,
            title: raw.title.trim().to_string(),
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(outline: Vec<OutlineNode>) -> ThesisSpec {
        ThesisSpec {
            title: "Test".to_string(),
            field: "Economics".to_string(),
            language: "en".to_string(),
            thesis_type: "bachelor".to_string(),
            research_question: String::new(),
            citation_style: CitationStyle::Apa,
            target_length: 1000,
            length_unit: LengthUnit::Words,
            outline,
            mandatory_sources: Vec::new(),
        }
    }

    #[test]
    fn test_loose_outline_shape() {
        let json = r#"[
            {"number": "1.", "title": "Intro"},
            {"number": 2, "title": " Body ", "sections": [
                {"number": "2.1", "title": "First"},
                {"number": "2.2", "title": "Second", "subsections": [
                    {"number": "2.2.1", "title": "Deep"}
                ]}
            ]}
        ]"#;
        let outline: Vec<OutlineNode> = serde_json::from_str(json).unwrap();

        assert_eq!(outline[0].id, "1");
        assert_eq!(outline[1].id, "2");
        assert_eq!(outline[1].title, "Body");
        assert_eq!(outline[1].children[1].children[0].id, "2.2.1");
        assert!(spec_with(outline).validate().is_ok());
    }

    #[test]
    fn test_strict_outline_serializes_strict() {
        let node = OutlineNode::new("1", "Intro");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "1");
        assert!(json["children"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let spec = spec_with(vec![OutlineNode::new("1", "A"), OutlineNode::new("1", "B")]);
        assert_eq!(spec.validate(), Err(SpecError::DuplicateId("1".to_string())));
    }

    #[test]
    fn test_validate_rejects_non_numeric() {
        let spec = spec_with(vec![OutlineNode::new("1a", "A")]);
        assert_eq!(spec.validate(), Err(SpecError::MalformedId("1a".to_string())));
    }

    #[test]
    fn test_validate_rejects_foreign_child() {
        let spec = spec_with(vec![
            OutlineNode::new("1", "A").with_children(vec![OutlineNode::new("2.1", "X")])
        ]);
        assert!(matches!(spec.validate(), Err(SpecError::NotChildOf { .. })));
    }

    #[test]
    fn test_validate_rejects_unordered_siblings() {
        let spec = spec_with(vec![OutlineNode::new("2", "B"), OutlineNode::new("1", "A")]);
        assert!(matches!(spec.validate(), Err(SpecError::SiblingOrder { .. })));
    }

    #[test]
    fn test_numeric_sibling_order() {
        let outline: Vec<OutlineNode> = (1..=11)
            .map(|i| OutlineNode::new(i.to_string(), format!("Chapter {}", i)))
            .collect();
        assert!(spec_with(outline).validate().is_ok());
    }

    #[test]
    fn test_pages_to_words() {
        let mut spec = spec_with(vec![OutlineNode::new("1", "A")]);
        spec.length_unit = LengthUnit::Pages;
        spec.target_length = 40;
        assert_eq!(spec.target_word_count(300), 12_000);
    }

    #[test]
    fn test_spec_json_camel_case() {
        let json = r#"{
            "title": "Remote work",
            "citationStyle": "deutsche-zitierweise",
            "targetWordCount": 5000,
            "outline": [{"id": "1", "title": "Intro"}]
        }"#;
        let spec: ThesisSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.citation_style, CitationStyle::DeutscheZitierweise);
        assert_eq!(spec.target_length, 5000);
        assert_eq!(spec.language, "en");
    }
}
