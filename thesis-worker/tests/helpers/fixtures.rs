//! Specs, references and wiring for pipeline tests

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use thesis_common::events::EventBus;
use thesis_worker::config::WorkerConfig;
use thesis_worker::models::{CitationStyle, LengthUnit, OutlineNode, ReferenceRecord, ThesisSpec};
use thesis_worker::services::PipelineController;
use thesis_worker::types::{GenerationTask, ServiceRegistry};

use super::mocks::{MockDetector, MockFetcher, MockIndex, MockScorer, MockSearch, ScriptedGenerator};

const VOCABULARY: &[&str] = &[
    "distributed", "teams", "report", "stable", "output", "while", "managers", "adjust",
    "coordination", "routines", "across", "several", "quarters", "and", "regions",
];

/// `n` words of filler prose in ten-word sentences
pub fn words(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(VOCABULARY[i % VOCABULARY.len()]);
        if i % 10 == 9 || i + 1 == n {
            out.push('.');
        }
    }
    out
}

/// A paragraph of about 200 words that cites Smith (2020)
pub fn cited_paragraph() -> String {
    format!(
        "Remote work changes how firms organise output (Smith, 2020, p. 4). {}",
        words(190)
    )
}

pub fn reference(title: &str, author: &str, year: i32, url: &str) -> ReferenceRecord {
    ReferenceRecord::new(title, vec![author.to_string()], Some(year)).with_document_url(url)
}

/// Three chapters, the second with two sections
pub fn remote_work_spec(target_words: usize) -> ThesisSpec {
    ThesisSpec {
        title: "Remote Work and Productivity".to_string(),
        field: "Economics".to_string(),
        language: "en".to_string(),
        thesis_type: "bachelor".to_string(),
        research_question: "Does remote work change productivity?".to_string(),
        citation_style: CitationStyle::Apa,
        target_length: target_words,
        length_unit: LengthUnit::Words,
        outline: vec![
            OutlineNode::new("1", "Introduction"),
            OutlineNode::new("2", "Evidence").with_children(vec![
                OutlineNode::new("2.1", "Firm Studies"),
                OutlineNode::new("2.2", "Survey Data"),
            ]),
            OutlineNode::new("3", "Conclusion"),
        ],
        mandatory_sources: Vec::new(),
    }
}

/// Defaults without pauses, sized for small documents
pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        acquisition_workers: 3,
        iteration_pause_ms: 0,
        ..WorkerConfig::default()
    }
}

/// The full set of scripted collaborators
pub struct Collaborators {
    pub search: Arc<MockSearch>,
    pub scorer: Arc<MockScorer>,
    pub fetcher: Arc<MockFetcher>,
    pub index: Arc<MockIndex>,
    pub generator: Arc<ScriptedGenerator>,
    pub detector: Arc<MockDetector>,
}

impl Collaborators {
    /// Six downloadable references, a generator that writes cited prose and
    /// finds no defects, and a detector that scores everything as human
    pub fn happy_path() -> Self {
        let records: Vec<ReferenceRecord> = (1..=6)
            .map(|i| {
                reference(
                    &format!("Remote Work Study {}", i),
                    if i == 1 { "Smith, John" } else { "Lee, Ann" },
                    2020,
                    &format!("https://papers.example.org/{}.pdf", i),
                )
            })
            .collect();

        Self {
            fetcher: Arc::new(MockFetcher::new().serving_all(&records)),
            search: Arc::new(MockSearch::new(records)),
            scorer: Arc::new(MockScorer::uniform(80.0)),
            index: Arc::new(MockIndex::new()),
            generator: Arc::new(writing_generator()),
            detector: Arc::new(MockDetector::fixed(90.0)),
        }
    }

    pub fn registry(&self) -> ServiceRegistry {
        registry(self)
    }
}

/// Generator that writes cited sections and reports no defects
pub fn writing_generator() -> ScriptedGenerator {
    ScriptedGenerator::new()
        .with_default(GenerationTask::Section, cited_paragraph())
        .with_default(
            GenerationTask::Summary,
            r#"{"topics": ["remote work"], "terms": ["output"], "claims": []}"#,
        )
        .with_default(GenerationTask::Critique, "[]")
        .with_default(GenerationTask::Verify, "[]")
}

pub fn registry(collaborators: &Collaborators) -> ServiceRegistry {
    ServiceRegistry {
        search: collaborators.search.clone(),
        scorer: collaborators.scorer.clone(),
        fetcher: collaborators.fetcher.clone(),
        index: collaborators.index.clone(),
        generator: collaborators.generator.clone(),
        detector: collaborators.detector.clone(),
        index_store_id: "test-store".to_string(),
    }
}

/// Controller with retry delays disabled
pub fn test_controller(db: SqlitePool, event_bus: EventBus, services: ServiceRegistry) -> PipelineController {
    PipelineController::new(db, event_bus, services, test_config()).with_retry_backoff(Duration::ZERO)
}
