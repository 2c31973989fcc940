//! Style convergence loop integration tests

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{words, MockDetector, ScriptedGenerator};
use thesis_worker::models::{DocumentTree, OutlineNode, PipelineWarning};
use thesis_worker::services::{StyleConfig, StyleConvergenceLoop};
use thesis_worker::types::GenerationTask;
use thesis_worker::utils::RetryPolicy;

const CITED: &str = "Hybrid schedules raise measured output in large firms (Smith, 2020, p. 4).";

fn config(iterations: usize) -> StyleConfig {
    StyleConfig {
        min_human_score: 70.0,
        iterations,
        spans_per_iteration: 3,
        chunk_chars: 12_000,
        pause: Duration::ZERO,
        retry: RetryPolicy::immediate(1),
    }
}

fn cited_tree() -> DocumentTree {
    let mut tree = DocumentTree::from_outline(&[OutlineNode::new("1", "Introduction")]);
    tree.set_content(
        "1",
        &format!(
            "{} Furthermore, it is important to note that commuting time falls sharply.\n\n{}",
            CITED,
            words(30)
        ),
    );
    tree
}

#[tokio::test]
async fn test_human_enough_text_is_not_rewritten() {
    let detector = Arc::new(MockDetector::fixed(85.0));
    let generator = Arc::new(ScriptedGenerator::new());
    let mut tree = cited_tree();
    let before = tree.clone();

    let outcome = StyleConvergenceLoop::new(detector.clone(), generator.clone(), config(5))
        .run(&mut tree, "en")
        .await;

    assert_eq!(tree, before);
    assert_eq!(outcome.summary.initial_score, Some(85.0));
    assert_eq!(outcome.summary.iterations, 0);
    assert!(outcome.warnings.is_empty());
    assert_eq!(detector.calls(), 1);
    assert_eq!(generator.call_count(GenerationTask::Rewrite), 0);
}

#[tokio::test]
async fn test_unavailable_detector_passes_text_through() {
    let detector = Arc::new(MockDetector::unavailable());
    let generator = Arc::new(ScriptedGenerator::new());
    let mut tree = cited_tree();
    let before = tree.clone();

    let outcome = StyleConvergenceLoop::new(detector, generator.clone(), config(5))
        .run(&mut tree, "en")
        .await;

    assert_eq!(tree, before);
    assert_eq!(outcome.summary.initial_score, None);
    assert!(matches!(
        outcome.warnings.as_slice(),
        [PipelineWarning::DetectorUnavailable { .. }]
    ));
    assert_eq!(generator.call_count(GenerationTask::Rewrite), 0);
}

#[tokio::test]
async fn test_rewrite_dropping_citation_is_rejected() {
    let detector = Arc::new(
        MockDetector::fixed(45.0).then(40.0, &["it is important to note that commuting time"]),
    );
    let generator = Arc::new(ScriptedGenerator::new().with_default(
        GenerationTask::Rewrite,
        "Hybrid schedules raise measured output in large firms. Commuting time also falls sharply for most staff.",
    ));
    let mut tree = cited_tree();
    let before = tree.clone();

    let outcome = StyleConvergenceLoop::new(detector, generator.clone(), config(1))
        .run(&mut tree, "en")
        .await;

    assert_eq!(tree, before, "the citation marker must survive every rewrite");
    assert_eq!(outcome.summary.rewrites_rejected, 1);
    assert_eq!(outcome.summary.rewrites_accepted, 0);
    assert_eq!(generator.call_count(GenerationTask::Rewrite), 1);

    let prompt = &generator.requests(GenerationTask::Rewrite)[0].prompt;
    assert!(prompt.contains("(Smith, 2020, p. 4)"));
    assert!(outcome
        .warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::StyleThresholdNotReached { .. })));
}

#[tokio::test]
async fn test_best_scoring_version_is_kept() {
    let first = format!(
        "{} Commuting time falls sharply once staff stay home two days a week.",
        CITED
    );
    let second = format!(
        "{} Commuting time drops when staff stay home on two weekdays.",
        CITED
    );
    let detector = Arc::new(
        MockDetector::fixed(50.0)
            .then(40.0, &["it is important to note that commuting time"])
            .then(60.0, &["once staff stay home two days"])
            .then(50.0, &[]),
    );
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_reply(GenerationTask::Rewrite, Ok(first.clone()))
            .with_reply(GenerationTask::Rewrite, Ok(second.clone())),
    );
    let mut tree = cited_tree();

    let outcome = StyleConvergenceLoop::new(detector, generator.clone(), config(2))
        .run(&mut tree, "en")
        .await;

    let content = &tree.find("1").expect("leaf").content;
    assert!(content.starts_with(&first), "the 60-point version wins over the later 50");
    assert!(!content.contains(&second));
    assert!(content.ends_with(&words(30)), "untouched paragraphs survive");

    assert_eq!(outcome.summary.initial_score, Some(40.0));
    assert_eq!(outcome.summary.final_score, Some(60.0));
    assert_eq!(outcome.summary.history, vec![60.0, 50.0]);
    assert_eq!(outcome.summary.rewrites_accepted, 2);
}
