//! Scripted collaborator implementations

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thesis_worker::error::ServiceError;
use thesis_worker::models::{ReferenceRecord, ThesisSpec};
use thesis_worker::types::{
    DetectabilityReport, DetectabilityScorer, DocumentFetcher, DocumentIndex, FlaggedSpan,
    GenerationRequest, GenerationTask, IndexMetadata, ReferenceSearch, RelevanceScorer,
    TextGenerator,
};

/// A PDF-looking payload above the default size floor, unique per `seed`
pub fn pdf_bytes(seed: &str) -> Vec<u8> {
    let mut bytes = format!("%PDF-1.4\n% {}\n", seed).into_bytes();
    while bytes.len() < 12 * 1024 {
        bytes.extend_from_slice(seed.as_bytes());
        bytes.push(b'\n');
    }
    bytes
}

/// Returns the same records for every query, or an error
pub struct MockSearch {
    records: Vec<ReferenceRecord>,
    error: Option<ServiceError>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new(records: Vec<ReferenceRecord>) -> Self {
        Self {
            records,
            error: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(error: ServiceError) -> Self {
        Self {
            records: Vec::new(),
            error: Some(error),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReferenceSearch for MockSearch {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn search(&self, query: &str, _language: &str) -> Result<Vec<ReferenceRecord>, ServiceError> {
        self.queries.lock().unwrap().push(query.to_string());
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.records.clone()),
        }
    }
}

/// Scores by title; unknown titles get `default_score`
pub struct MockScorer {
    scores: HashMap<String, f64>,
    default_score: f64,
}

impl MockScorer {
    pub fn uniform(score: f64) -> Self {
        Self {
            scores: HashMap::new(),
            default_score: score,
        }
    }

    pub fn with_score(mut self, title: &str, score: f64) -> Self {
        self.scores.insert(title.to_string(), score);
        self
    }
}

#[async_trait::async_trait]
impl RelevanceScorer for MockScorer {
    async fn score(
        &self,
        _spec: &ThesisSpec,
        records: Vec<ReferenceRecord>,
    ) -> Result<Vec<ReferenceRecord>, ServiceError> {
        Ok(records
            .into_iter()
            .map(|mut r| {
                let score = self.scores.get(&r.title).copied().unwrap_or(self.default_score);
                r.relevance_score = Some(score);
                r
            })
            .collect())
    }
}

/// Per-URL fetch results; unknown URLs answer 404
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, Result<Vec<u8>, ServiceError>>,
    delays: HashMap<String, Duration>,
    fetched: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serving(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), Ok(bytes));
        self
    }

    pub fn failing(mut self, url: &str, error: ServiceError) -> Self {
        self.responses.insert(url.to_string(), Err(error));
        self
    }

    /// Answer `url` only after `delay`
    pub fn delayed(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Serve a unique PDF for every record that has a document URL
    pub fn serving_all(mut self, records: &[ReferenceRecord]) -> Self {
        for url in records.iter().filter_map(|r| r.document_url.as_deref()) {
            self.responses.insert(url.to_string(), Ok(pdf_bytes(url)));
        }
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        match self.responses.get(url) {
            Some(result) => result.clone(),
            None => Err(ServiceError::Api {
                status: 404,
                message: format!("{} not found", url),
            }),
        }
    }
}

/// Accepts every upload and records its metadata, unless told to reject it
pub struct MockIndex {
    has_documents: bool,
    rejections: HashMap<String, Duration>,
    uploads: Mutex<Vec<IndexMetadata>>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self {
            has_documents: false,
            rejections: HashMap::new(),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Index that already holds documents from an earlier run
    pub fn populated() -> Self {
        Self {
            has_documents: true,
            ..Self::new()
        }
    }

    /// Reject the document named `display_name` after `delay`
    pub fn rejecting(mut self, display_name: &str, delay: Duration) -> Self {
        self.rejections.insert(display_name.to_string(), delay);
        self
    }

    pub fn uploads(&self) -> Vec<IndexMetadata> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DocumentIndex for MockIndex {
    async fn upload(&self, _bytes: &[u8], metadata: &IndexMetadata) -> Result<bool, ServiceError> {
        if let Some(delay) = self.rejections.get(&metadata.display_name) {
            tokio::time::sleep(*delay).await;
            return Ok(false);
        }
        self.uploads.lock().unwrap().push(metadata.clone());
        Ok(true)
    }

    async fn has_documents(&self, _store_id: &str) -> Result<bool, ServiceError> {
        Ok(self.has_documents || !self.uploads.lock().unwrap().is_empty())
    }
}

type Responder = Box<dyn Fn(&GenerationRequest) -> Option<Result<String, ServiceError>> + Send + Sync>;

/// Text generator answering from scripts
///
/// Lookup order: the responder closure, then the per-task queue, then the
/// per-task default. Anything unscripted fails as unavailable.
#[derive(Default)]
pub struct ScriptedGenerator {
    responder: Option<Responder>,
    queued: Mutex<HashMap<GenerationTask, VecDeque<Result<String, ServiceError>>>>,
    defaults: HashMap<GenerationTask, String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, task: GenerationTask, reply: impl Into<String>) -> Self {
        self.defaults.insert(task, reply.into());
        self
    }

    pub fn with_reply(self, task: GenerationTask, reply: Result<String, ServiceError>) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Option<Result<String, ServiceError>> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn requests(&self, task: GenerationTask) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, task: GenerationTask) -> usize {
        self.requests(task).len()
    }
}

#[async_trait::async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(responder) = &self.responder {
            if let Some(reply) = responder(&request) {
                return reply;
            }
        }
        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.task)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }
        match self.defaults.get(&request.task) {
            Some(reply) => Ok(reply.clone()),
            None => Err(ServiceError::Unavailable(format!(
                "no scripted reply for {:?}",
                request.task
            ))),
        }
    }
}

/// Detector answering from a queue of reports, then a fixed report
pub struct MockDetector {
    queued: Mutex<VecDeque<Result<DetectabilityReport, ServiceError>>>,
    fallback: Result<DetectabilityReport, ServiceError>,
    calls: AtomicUsize,
}

impl MockDetector {
    pub fn fixed(score: f64) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Ok(report(score, &[])),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Err(ServiceError::Unavailable("detector disabled".to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a report flagging `spans` at a low span score
    pub fn then(self, score: f64, spans: &[&str]) -> Self {
        self.queued.lock().unwrap().push_back(Ok(report(score, spans)));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn report(score: f64, spans: &[&str]) -> DetectabilityReport {
    DetectabilityReport {
        score,
        flagged_spans: spans
            .iter()
            .map(|text| FlaggedSpan {
                text: text.to_string(),
                score: 10.0,
            })
            .collect(),
    }
}

#[async_trait::async_trait]
impl DetectabilityScorer for MockDetector {
    async fn score(&self, _text: &str) -> Result<DetectabilityReport, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.queued.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback.clone()
    }
}
