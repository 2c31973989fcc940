//! Document tree mirroring the outline
//!
//! Each node owns only its own body text. `reassemble()` and `parse()` are
//! inverse for trees whose titles and bodies came out of generation (bodies
//! are sanitized so they never contain outline-style headings).

use crate::models::OutlineNode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Heading carrying a dotted numeric id: `## 1. Title`, `### 2.1 Title`
static NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#{2,7})[ \t]+(\d+(?:\.\d+)*)\.?(?:[ \t]+(.*?))?[ \t]*$").unwrap()
});

/// Any Markdown heading line
static ANY_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,7}[ \t]+\S").unwrap());

const PLACEHOLDER_PREFIX: &str = "<!-- generation-failed: ";

#[derive(Debug, Error, PartialEq)]
pub enum TreeParseError {
    #[error("Heading '{0}' skips a level")]
    SkippedLevel(String),

    #[error("Text found before the first chapter heading")]
    ContentBeforeFirstHeading,
}

/// One node of the generated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    pub title: String,
    /// 1 for chapters, 2 for sections, ...
    pub depth: usize,
    pub content: String,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
}

impl DocumentNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Heading line for this node
    pub fn heading(&self) -> String {
        let title = self.title.trim();
        if self.depth <= 1 {
            if title.is_empty() {
                format!("## {}.", self.id)
            } else {
                format!("## {}. {}", self.id, title)
            }
        } else {
            let hashes = "#".repeat(self.depth + 1);
            if title.is_empty() {
                format!("{} {}", hashes, self.id)
            } else {
                format!("{} {} {}", hashes, self.id, title)
            }
        }
    }

    /// Markdown for this node and its descendants
    pub fn render(&self) -> String {
        let mut blocks = Vec::new();
        self.render_into(&mut blocks);
        blocks.join("\n\n")
    }

    fn render_into(&self, blocks: &mut Vec<String>) {
        blocks.push(self.heading());
        if !self.content.is_empty() {
            blocks.push(self.content.clone());
        }
        for child in &self.children {
            child.render_into(blocks);
        }
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a DocumentNode>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut DocumentNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    fn from_outline(node: &OutlineNode, depth: usize) -> Self {
        Self {
            id: node.id.clone(),
            title: node.title.trim().to_string(),
            depth,
            content: String::new(),
            children: node
                .children
                .iter()
                .map(|c| DocumentNode::from_outline(c, depth + 1))
                .collect(),
        }
    }
}

/// Ordered tree of generated content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub nodes: Vec<DocumentNode>,
}

impl DocumentTree {
    /// Empty tree with the outline's shape
    pub fn from_outline(outline: &[OutlineNode]) -> Self {
        Self {
            nodes: outline
                .iter()
                .map(|n| DocumentNode::from_outline(n, 1))
                .collect(),
        }
    }

    /// Full Markdown document in outline order
    pub fn reassemble(&self) -> String {
        self.nodes
            .iter()
            .map(|n| n.render())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Parse a document by its numbered heading markers
    pub fn parse(markdown: &str) -> Result<Self, TreeParseError> {
        // Path of indices from the root to the node currently receiving text
        let mut tree = DocumentTree::default();
        let mut path: Vec<usize> = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();

        for line in markdown.lines() {
            let Some(caps) = NUMBERED_HEADING.captures(line) else {
                if path.is_empty() {
                    if !line.trim().is_empty() {
                        return Err(TreeParseError::ContentBeforeFirstHeading);
                    }
                } else {
                    buffer.push(line);
                }
                continue;
            };

            if !path.is_empty() {
                tree.node_at_mut(&path).content = buffer.join("\n").trim().to_string();
            }
            buffer.clear();

            let depth = caps[1].len() - 1;
            if depth > path.len() + 1 {
                return Err(TreeParseError::SkippedLevel(line.to_string()));
            }
            path.truncate(depth - 1);

            let node = DocumentNode {
                id: caps[2].to_string(),
                title: caps.get(3).map(|m| m.as_str().trim()).unwrap_or("").to_string(),
                depth,
                content: String::new(),
                children: Vec::new(),
            };

            let siblings = if path.is_empty() {
                &mut tree.nodes
            } else {
                &mut tree.node_at_mut(&path).children
            };
            siblings.push(node);
            path.push(siblings.len() - 1);
        }

        if !path.is_empty() {
            tree.node_at_mut(&path).content = buffer.join("\n").trim().to_string();
        }

        Ok(tree)
    }

    fn node_at_mut(&mut self, path: &[usize]) -> &mut DocumentNode {
        let mut node = &mut self.nodes[path[0]];
        for &i in &path[1..] {
            node = &mut node.children[i];
        }
        node
    }

    /// All nodes in pre-order
    pub fn walk(&self) -> Vec<&DocumentNode> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.walk(&mut out);
        }
        out
    }

    /// Leaves in outline order
    pub fn leaves(&self) -> Vec<&DocumentNode> {
        self.walk().into_iter().filter(|n| n.is_leaf()).collect()
    }

    /// Top-level chapters
    pub fn chapters(&self) -> &[DocumentNode] {
        &self.nodes
    }

    pub fn find(&self, id: &str) -> Option<&DocumentNode> {
        self.walk().into_iter().find(|n| n.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut DocumentNode> {
        self.nodes.iter_mut().find_map(|n| n.find_mut(id))
    }

    /// Replace a node's body; returns false when the id is unknown
    pub fn set_content(&mut self, id: &str, content: &str) -> bool {
        match self.find_mut(id) {
            Some(node) => {
                node.content = content.trim().to_string();
                true
            }
            None => false,
        }
    }

    /// Top-level chapter containing `id`
    pub fn chapter_of(&self, id: &str) -> Option<&DocumentNode> {
        let top = id.split('.').next()?;
        self.nodes.iter().find(|n| n.id == top)
    }

    /// Words across all bodies, excluding headings and placeholders
    pub fn word_count(&self) -> usize {
        self.walk()
            .iter()
            .filter(|n| !is_placeholder_text(&n.content))
            .map(|n| count_words(&n.content))
            .sum()
    }

    pub fn placeholder(id: &str) -> String {
        format!("{}{} -->", PLACEHOLDER_PREFIX, id)
    }

    /// True when the node's content is a generation-failed placeholder
    pub fn is_placeholder(&self, id: &str) -> bool {
        self.find(id)
            .map(|n| is_placeholder_text(&n.content))
            .unwrap_or(false)
    }
}

pub fn is_placeholder_text(content: &str) -> bool {
    content.trim_start().starts_with(PLACEHOLDER_PREFIX)
}

/// Whitespace-separated word count
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Remove outline-style headings from generated body text
///
/// Numbered headings would be taken for tree nodes when the document is parsed
/// back; unnumbered subheadings are kept as body text.
pub fn strip_outline_headings(text: &str) -> String {
    text.lines()
        .filter(|line| !NUMBERED_HEADING.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Remove every Markdown heading line (continuations must not repeat headings)
pub fn strip_all_headings(text: &str) -> String {
    text.lines()
        .filter(|line| !ANY_HEADING.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> DocumentTree {
        let outline = vec![
            OutlineNode::new("1", "Intro"),
            OutlineNode::new("2", "Body").with_children(vec![
                OutlineNode::new("2.1", "First"),
                OutlineNode::new("2.2", "Second")
                    .with_children(vec![OutlineNode::new("2.2.1", "Deep")]),
            ]),
        ];
        let mut tree = DocumentTree::from_outline(&outline);
        tree.set_content("1", "Intro text.\n\nSecond paragraph.");
        tree.set_content("2.1", "First text with a list:\n\n- a\n- b");
        tree.set_content("2.2.1", "#### Unnumbered subheading\n\nDeep text.");
        tree
    }

    #[test]
    fn test_heading_format() {
        let tree = sample_tree();
        assert_eq!(tree.find("1").unwrap().heading(), "## 1. Intro");
        assert_eq!(tree.find("2.1").unwrap().heading(), "### 2.1 First");
        assert_eq!(tree.find("2.2.1").unwrap().heading(), "#### 2.2.1 Deep");
    }

    #[test]
    fn test_round_trip() {
        let tree = sample_tree();
        let parsed = DocumentTree::parse(&tree.reassemble()).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn test_wrapper_emitted_as_bare_heading() {
        let doc = sample_tree().reassemble();
        assert!(doc.contains("## 2. Body\n\n### 2.1 First"));
    }

    #[test]
    fn test_parse_rejects_skipped_level() {
        let doc = "## 1. Intro\n\n#### 1.1.1 Too deep\n";
        assert!(matches!(
            DocumentTree::parse(doc),
            Err(TreeParseError::SkippedLevel(_))
        ));
    }

    #[test]
    fn test_parse_rejects_preamble() {
        assert_eq!(
            DocumentTree::parse("Stray\n## 1. Intro"),
            Err(TreeParseError::ContentBeforeFirstHeading)
        );
    }

    #[test]
    fn test_placeholder() {
        let mut tree = sample_tree();
        tree.set_content("2.1", &DocumentTree::placeholder("2.1"));
        assert!(tree.is_placeholder("2.1"));
        assert!(!tree.is_placeholder("1"));
        let parsed = DocumentTree::parse(&tree.reassemble()).unwrap();
        assert!(parsed.is_placeholder("2.1"));
    }

    #[test]
    fn test_strip_outline_headings() {
        let body = "## 3. Other chapter\nText\n### Background\nMore";
        assert_eq!(strip_outline_headings(body), "Text\n### Background\nMore");
        assert_eq!(strip_all_headings(body), "Text\nMore");
    }

    #[test]
    fn test_chapter_of() {
        let tree = sample_tree();
        assert_eq!(tree.chapter_of("2.2.1").unwrap().id, "2");
        assert!(tree.chapter_of("9").is_none());
    }
}
