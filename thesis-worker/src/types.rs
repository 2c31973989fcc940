//! Collaborator traits and shared request types
//!
//! The pipeline talks to every external service through one of these traits.
//! Production HTTP clients live in `services::*_client`; tests substitute
//! scripted implementations.

use crate::error::ServiceError;
use crate::models::{ReferenceRecord, ThesisSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Literature search
#[async_trait::async_trait]
pub trait ReferenceSearch: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, language: &str)
        -> Result<Vec<ReferenceRecord>, ServiceError>;
}

/// Relevance scoring of candidate references against the thesis
#[async_trait::async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Returns the records with `relevance_score` attached (0-100)
    async fn score(
        &self,
        spec: &ThesisSpec,
        records: Vec<ReferenceRecord>,
    ) -> Result<Vec<ReferenceRecord>, ServiceError>;
}

/// Full-text download
#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError>;
}

/// Metadata submitted with an indexed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub store_id: String,
    pub display_name: String,
    pub external_id: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub page_count: u32,
    pub mime_type: String,
    /// SHA-256 of the document bytes, hex
    pub content_hash: String,
}

/// Retrieval index the generator grounds its text on
#[async_trait::async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Returns false when the index refused the document
    async fn upload(&self, bytes: &[u8], metadata: &IndexMetadata) -> Result<bool, ServiceError>;

    async fn has_documents(&self, store_id: &str) -> Result<bool, ServiceError>;
}

/// What a generation call is for; drives logging and lets test doubles script replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    Relevance,
    Section,
    Summary,
    Critique,
    Verify,
    Repair,
    Rewrite,
}

/// One call to the text generation service
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    pub prompt: String,
    /// Supplementary context (rolling digest, chapter text, defect list)
    pub context: Option<String>,
    pub max_tokens: u32,
    /// Ground the answer on the document index
    pub grounded: bool,
}

impl GenerationRequest {
    pub fn new(task: GenerationTask, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            task,
            prompt: prompt.into(),
            context: None,
            max_tokens,
            grounded: false,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn grounded(mut self) -> Self {
        self.grounded = true;
        self
    }
}

/// Text generation
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError>;
}

/// A span the detector considers likely machine-written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedSpan {
    pub text: String,
    /// Human-likeness of the span, 0-100
    pub score: f64,
}

/// Detector verdict for one text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectabilityReport {
    /// Human-likeness percentage, 0-100 (higher is more human)
    pub score: f64,
    pub flagged_spans: Vec<FlaggedSpan>,
}

/// Machine-authorship detection
#[async_trait::async_trait]
pub trait DetectabilityScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<DetectabilityReport, ServiceError>;
}

/// The set of collaborators one pipeline run uses
#[derive(Clone)]
pub struct ServiceRegistry {
    pub search: Arc<dyn ReferenceSearch>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub index: Arc<dyn DocumentIndex>,
    pub generator: Arc<dyn TextGenerator>,
    pub detector: Arc<dyn DetectabilityScorer>,
    /// Store that acquired documents go to
    pub index_store_id: String,
}
