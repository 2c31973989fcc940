//! Pipeline stages and collaborator clients
//!
//! Stages: `source_ranker` → `acquisition_pool` → `section_generator` →
//! `repair_loop` (`critique_engine` + `patch_engine`) → `style_convergence`,
//! sequenced by `pipeline_controller` and started by `scheduler`.
//!
//! Clients: `openalex_client`, `relevance_scorer`, `document_fetcher`,
//! `document_index`, `gemini_client`, `zerogpt_client`.

pub mod acquisition_pool;
pub mod citations;
pub mod critique_engine;
pub mod document_fetcher;
pub mod document_index;
pub mod gemini_client;
pub mod openalex_client;
pub mod patch_engine;
pub mod pipeline_controller;
pub mod progress;
pub mod prompts;
pub mod quality_checker;
pub mod relevance_scorer;
pub mod repair_loop;
pub mod scheduler;
pub mod section_generator;
pub mod source_ranker;
pub mod style_convergence;
pub mod zerogpt_client;

pub use acquisition_pool::{AcquisitionConfig, AcquisitionPool, AcquisitionReport};
pub use critique_engine::CritiqueEngine;
pub use document_fetcher::HttpDocumentFetcher;
pub use document_index::HttpDocumentIndex;
pub use gemini_client::GeminiClient;
pub use openalex_client::OpenAlexClient;
pub use patch_engine::{MatchStrategy, PatchEngine, PatchOutcome, PatchStatus};
pub use pipeline_controller::PipelineController;
pub use progress::ProgressReporter;
pub use quality_checker::QualityChecker;
pub use relevance_scorer::LlmRelevanceScorer;
pub use repair_loop::{RepairConfig, RepairLoop, RepairOutcome};
pub use scheduler::{Scheduler, SchedulerError};
pub use section_generator::{GenerationConfig, GenerationReport, SectionGenerator};
pub use source_ranker::SourceRanker;
pub use style_convergence::{StyleConfig, StyleConvergenceLoop, StyleOutcome};
pub use zerogpt_client::ZeroGptClient;
