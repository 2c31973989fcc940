//! Test Helper Utilities
//!
//! Scripted collaborators and fixtures shared by the thesis-worker
//! integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::{
    cited_paragraph, reference, registry, remote_work_spec, test_config, test_controller, words,
    writing_generator, Collaborators,
};
pub use mocks::{
    pdf_bytes, MockDetector, MockFetcher, MockIndex, MockScorer, MockSearch, ScriptedGenerator,
};
