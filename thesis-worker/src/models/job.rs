//! Thesis job state machine
//!
//! QUEUED → RANKING → ACQUIRING → GENERATING → REPAIRING → HUMANIZING → COMPLETED
//! Any non-terminal state may move to FAILED.

use crate::models::ThesisSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Accepted, waiting for a scheduler slot
    Queued,
    /// Literature search and relevance scoring
    Ranking,
    /// Document download and indexing
    Acquiring,
    /// Per-leaf text generation
    Generating,
    /// Critique and patch loop
    Repairing,
    /// Style convergence against the detector
    Humanizing,
    /// Finished, possibly with warnings
    Completed,
    /// Aborted by a fatal error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Ranking => "RANKING",
            JobState::Acquiring => "ACQUIRING",
            JobState::Generating => "GENERATING",
            JobState::Repairing => "REPAIRING",
            JobState::Humanizing => "HUMANIZING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobState::Queued),
            "RANKING" => Some(JobState::Ranking),
            "ACQUIRING" => Some(JobState::Acquiring),
            "GENERATING" => Some(JobState::Generating),
            "REPAIRING" => Some(JobState::Repairing),
            "HUMANIZING" => Some(JobState::Humanizing),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// Non-fatal conditions recorded in job metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Fewer documents acquired than the target
    AcquisitionShortfall { target: usize, acquired: usize },
    /// Nothing acquired this run but the index already had documents
    NoNewDocuments,
    /// A search query failed after retries
    SearchFailed { query: String, error: String },
    /// A leaf ended below the minimum acceptable word ratio
    WordBudgetShortfall {
        section_id: String,
        budget: usize,
        written: usize,
    },
    /// A leaf produced no text and holds a placeholder
    SectionGenerationFailed { section_id: String },
    /// Defects still present when the repair loop ran out of iterations
    DefectsUnresolved { remaining: usize },
    /// The style loop never reached its threshold
    StyleThresholdNotReached { best_score: f64, threshold: f64 },
    /// Detector unavailable, content passed through unscored
    DetectorUnavailable { reason: String },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::AcquisitionShortfall { target, acquired } => {
                write!(f, "Acquired {} of {} target documents", acquired, target)
            }
            PipelineWarning::NoNewDocuments => {
                write!(f, "No new documents acquired, using existing index")
            }
            PipelineWarning::SearchFailed { query, error } => {
                write!(f, "Search '{}' failed: {}", query, error)
            }
            PipelineWarning::WordBudgetShortfall {
                section_id,
                budget,
                written,
            } => write!(
                f,
                "Section {} has {} of {} budgeted words",
                section_id, written, budget
            ),
            PipelineWarning::SectionGenerationFailed { section_id } => {
                write!(f, "Section {} could not be generated", section_id)
            }
            PipelineWarning::DefectsUnresolved { remaining } => {
                write!(f, "{} defects unresolved after repair", remaining)
            }
            PipelineWarning::StyleThresholdNotReached {
                best_score,
                threshold,
            } => write!(
                f,
                "Best detectability score {:.1} below threshold {:.1}",
                best_score, threshold
            ),
            PipelineWarning::DetectorUnavailable { reason } => {
                write!(f, "Detector unavailable: {}", reason)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub target: usize,
    pub acquired: usize,
    pub failed: usize,
    pub candidates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub iterations: usize,
    pub initial_defects: usize,
    pub remaining_defects: usize,
    pub patches_applied: usize,
    pub patches_rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleSummary {
    pub initial_score: Option<f64>,
    pub final_score: Option<f64>,
    pub iterations: usize,
    pub rewrites_accepted: usize,
    pub rewrites_rejected: usize,
    /// Score after each iteration
    pub history: Vec<f64>,
}

/// Post-generation validation result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub valid: bool,
    pub word_count: usize,
    pub target_words: usize,
    pub word_count_within_limit: bool,
    pub missing_mandatory_sources: Vec<String>,
    pub errors: Vec<String>,
}

/// Statistics and warnings accumulated while a job runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub warnings: Vec<PipelineWarning>,
    #[serde(default)]
    pub target_words: usize,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub references_ranked: usize,
    #[serde(default)]
    pub acquisition: Option<AcquisitionSummary>,
    #[serde(default)]
    pub sections_generated: usize,
    #[serde(default)]
    pub sections_failed: usize,
    #[serde(default)]
    pub repair: Option<RepairSummary>,
    #[serde(default)]
    pub style: Option<StyleSummary>,
    #[serde(default)]
    pub quality: Option<QualityReport>,
    #[serde(default)]
    pub references_cited: usize,
}

/// A document generation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThesisJob {
    pub job_id: Uuid,
    pub state: JobState,
    pub spec: ThesisSpec,
    pub metadata: JobMetadata,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ThesisJob {
    pub fn new(job_id: Uuid, spec: ThesisSpec) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            state: JobState::Queued,
            spec,
            metadata: JobMetadata::default(),
            error: None,
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: JobState) -> StateTransition {
        let transition = StateTransition {
            job_id: self.job_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        self.updated_at = transition.transitioned_at;

        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        transition
    }

    /// Record a fatal error and move to FAILED
    pub fn fail(&mut self, error: impl Into<String>) -> StateTransition {
        self.error = Some(error.into());
        self.transition_to(JobState::Failed)
    }

    pub fn warn(&mut self, warning: PipelineWarning) {
        tracing::warn!(job_id = %self.job_id, "{}", warning);
        self.metadata.warnings.push(warning);
    }
}
