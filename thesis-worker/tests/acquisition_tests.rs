//! Acquisition pool integration tests
//!
//! Bounded success count, dynamic backfill and single use of candidates.

mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use helpers::{pdf_bytes, reference, MockFetcher, MockIndex};
use thesis_worker::error::ServiceError;
use thesis_worker::models::ReferenceRecord;
use thesis_worker::services::{AcquisitionConfig, AcquisitionPool};
use thesis_worker::utils::RetryPolicy;

fn config(target: usize, workers: usize) -> AcquisitionConfig {
    AcquisitionConfig {
        workers,
        target,
        min_bytes: 10 * 1024,
        max_bytes: 1024 * 1024,
        bytes_per_page: 60_000,
        relevance_floor: 30.0,
        min_per_chapter: 0,
        store_id: "test-store".to_string(),
        fetch_retry: RetryPolicy::immediate(1),
        index_retry: RetryPolicy::immediate(1),
    }
}

/// Candidates ranked by descending relevance: 90, 80, 70, ...
fn candidates(n: usize) -> Vec<ReferenceRecord> {
    (1..=n)
        .map(|i| {
            reference(
                &format!("Candidate {}", i),
                "Smith, John",
                2020,
                &format!("https://papers.example.org/{}.pdf", i),
            )
            .with_relevance(100.0 - 10.0 * i as f64)
        })
        .collect()
}

fn url(i: usize) -> String {
    format!("https://papers.example.org/{}.pdf", i)
}

#[tokio::test]
async fn test_failed_candidate_is_replaced_by_next_best() {
    let records = candidates(5);
    let fetcher = Arc::new(
        MockFetcher::new()
            .serving_all(&records)
            .failing(&url(1), ServiceError::Api {
                status: 404,
                message: "gone".to_string(),
            }),
    );
    let index = Arc::new(MockIndex::new());
    let pool = AcquisitionPool::new(fetcher.clone(), index.clone(), config(3, 3));

    let report = pool.run(records).await;

    let titles: HashSet<&str> = report.acquired.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(report.acquired.len(), 3);
    assert!(titles.contains("Candidate 2"));
    assert!(titles.contains("Candidate 3"));
    assert!(titles.contains("Candidate 4"), "best unused candidate backfills the failure");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].title, "Candidate 1");

    assert_eq!(fetcher.fetch_count(&url(1)), 1, "a failed candidate is never retried");
    assert_eq!(fetcher.fetch_count(&url(5)), 0);
    assert_eq!(index.uploads().len(), 3);
    assert_eq!(report.shortfall(), 0);
}

#[tokio::test]
async fn test_successes_never_exceed_target() {
    let records = candidates(6);
    let fetcher = Arc::new(MockFetcher::new().serving_all(&records));
    let index = Arc::new(MockIndex::new());
    let pool = AcquisitionPool::new(fetcher.clone(), index.clone(), config(2, 4));

    let report = pool.run(records).await;

    assert_eq!(report.acquired.len(), 2);
    assert_eq!(index.uploads().len(), 2);
    assert_eq!(report.acquired[0].title, "Candidate 1");
    assert_eq!(report.acquired[1].title, "Candidate 2");
}

#[tokio::test]
async fn test_every_candidate_claimed_at_most_once() {
    let records = candidates(6);
    // Nothing is served, so every candidate fails and triggers a backfill
    let fetcher = Arc::new(MockFetcher::new());
    let index = Arc::new(MockIndex::new());
    let pool = AcquisitionPool::new(fetcher.clone(), index.clone(), config(3, 3));

    let report = pool.run(records).await;

    assert!(report.acquired.is_empty());
    assert_eq!(report.shortfall(), 3);
    assert_eq!(report.failures.len(), 6);

    let unique: HashSet<&String> = report.used_ids.iter().collect();
    assert_eq!(unique.len(), report.used_ids.len(), "no candidate claimed twice");
    for i in 1..=6 {
        assert_eq!(fetcher.fetch_count(&url(i)), 1);
    }
    assert!(index.uploads().is_empty());
}

#[tokio::test]
async fn test_duplicate_content_rejected() {
    let records = candidates(3);
    let same = pdf_bytes("shared");
    let fetcher = Arc::new(
        MockFetcher::new()
            .serving(&url(1), same.clone())
            .serving(&url(2), same)
            .serving(&url(3), pdf_bytes("third")),
    );
    let index = Arc::new(MockIndex::new());
    let pool = AcquisitionPool::new(fetcher, index.clone(), config(2, 1));

    let report = pool.run(records).await;

    let titles: Vec<&str> = report.acquired.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Candidate 1", "Candidate 3"]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("same content"));

    let hashes: HashSet<String> = index.uploads().into_iter().map(|m| m.content_hash).collect();
    assert_eq!(hashes.len(), 2);
}

#[tokio::test]
async fn test_low_relevance_candidates_not_used_as_replacements() {
    let mut records = candidates(3);
    records[2].relevance_score = Some(10.0);
    let fetcher = Arc::new(
        MockFetcher::new()
            .serving_all(&records)
            .failing(&url(1), ServiceError::Api {
                status: 403,
                message: "forbidden".to_string(),
            }),
    );
    let index = Arc::new(MockIndex::new());
    let pool = AcquisitionPool::new(fetcher.clone(), index, config(1, 1));

    let report = pool.run(records).await;

    assert_eq!(report.acquired.len(), 1);
    assert_eq!(report.acquired[0].title, "Candidate 2");
    assert_eq!(fetcher.fetch_count(&url(3)), 0);
}

#[tokio::test]
async fn test_acquired_records_carry_page_range() {
    let records = candidates(1);
    let fetcher = Arc::new(MockFetcher::new().serving_all(&records));
    let index = Arc::new(MockIndex::new());
    let pool = AcquisitionPool::new(fetcher, index.clone(), config(1, 1));

    let report = pool.run(records).await;

    let acquired = &report.acquired[0];
    assert_eq!(acquired.page_start, Some(1));
    assert!(acquired.page_end.unwrap_or(0) >= 1);

    let uploads = index.uploads();
    assert_eq!(uploads[0].store_id, "test-store");
    assert_eq!(uploads[0].mime_type, "application/pdf");
    assert_eq!(uploads[0].display_name, "Candidate 1");
}

#[tokio::test]
async fn test_candidate_waits_for_slot_held_by_failing_upload() {
    // One document wanted, both chapters seeded, two workers
    let records = vec![
        candidates(2)[0].clone().with_affinity("1"),
        candidates(2)[1].clone().with_affinity("2"),
    ];
    let fetcher = Arc::new(
        MockFetcher::new()
            .serving_all(&records)
            .delayed(&url(2), Duration::from_millis(30)),
    );
    let index = Arc::new(MockIndex::new().rejecting("Candidate 1", Duration::from_millis(200)));
    let mut cfg = config(1, 2);
    cfg.min_per_chapter = 1;
    let pool = AcquisitionPool::new(fetcher.clone(), index.clone(), cfg);

    let report = pool.run(records).await;

    assert_eq!(report.acquired.len(), 1, "the waiting candidate takes the released slot");
    assert_eq!(report.acquired[0].title, "Candidate 2");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].title, "Candidate 1");
    assert!(report.failures[0].reason.contains("rejected"));
    assert_eq!(fetcher.fetch_count(&url(2)), 1);
    assert_eq!(index.uploads().len(), 1);
    assert_eq!(report.shortfall(), 0);
}
