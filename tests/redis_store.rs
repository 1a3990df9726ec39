//! Tracker and store behaviour against a live Redis server.
//!
//! Gated behind `E2E_ENABLED` and `REDIS_URL` so they only run when a server
//! is available. Every test works on fresh UUID job ids and cleans up after
//! itself.
//!
//! Run with:
//!   E2E_ENABLED=1 REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test redis_store -- --nocapture

#![cfg(feature = "redis")]

use pdf_fanout::store::keys;
use pdf_fanout::{FanoutError, JobStatus, PageOutcome, PageType, RedisStore, StateStore, TaskTracker};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED and REDIS_URL are both set.
macro_rules! redis_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run Redis tests");
            return;
        }
        match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => {
                println!("SKIP: set REDIS_URL=redis://host:port/db");
                return;
            }
        }
    }};
}

async fn connect(url: &str) -> (Arc<RedisStore>, TaskTracker) {
    let store = Arc::new(RedisStore::connect(url).await.unwrap());
    let tracker = TaskTracker::new(store.clone(), Duration::from_secs(300));
    (store, tracker)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_primitive_replies_decode() {
    let url = redis_skip_unless_ready!();
    let (store, _) = connect(&url).await;
    let key = format!("job:{}", uuid::Uuid::new_v4());

    assert!(store.hset_nx(&key, "terminal", "a").await.unwrap());
    assert!(!store.hset_nx(&key, "terminal", "b").await.unwrap());
    assert_eq!(
        store.hget(&key, "terminal").await.unwrap().as_deref(),
        Some("a")
    );
    assert_eq!(store.hget(&key, "absent").await.unwrap(), None);
    assert_eq!(store.hincr(&key, "n", 2).await.unwrap(), 2);
    assert_eq!(store.hincr(&key, "n", 3).await.unwrap(), 5);
    assert!(store.hgetall("job:never-written").await.unwrap().is_empty());

    store.del(&[key.clone()]).await.unwrap();
    assert!(store.hgetall(&key).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_reports_count_once() {
    let url = redis_skip_unless_ready!();
    let (_, tracker) = connect(&url).await;
    let id = tracker.create_job("dup.pdf", 2).await.unwrap();
    tracker.mark_processing(&id).await.unwrap();

    let reports: Vec<_> = (0..8)
        .map(|i| {
            let t = tracker.clone();
            let id = id.clone();
            tokio::spawn(async move {
                t.mark_page_completed(&id, 0, PageOutcome::Success(format!("copy {i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for r in reports {
        assert!(!r.await.unwrap());
    }

    let rec = tracker.get_job_status(&id).await.unwrap().unwrap();
    assert_eq!(rec.completed_pages, 1);
    assert_eq!(rec.status, JobStatus::Processing);

    let last = tracker
        .mark_page_completed(&id, 1, PageOutcome::Failure("unreadable".into()))
        .await
        .unwrap();
    assert!(last);
    let rec = tracker.get_job_status(&id).await.unwrap().unwrap();
    assert_eq!(rec.status, JobStatus::CompletedWithErrors);
    assert_eq!(rec.failed_pages, 1);
    assert_eq!(rec.errors[0].error, "unreadable");

    tracker.cleanup_job(&id).await.unwrap();
}

#[tokio::test]
async fn test_failed_job_stays_failed() {
    let url = redis_skip_unless_ready!();
    let (_, tracker) = connect(&url).await;
    let id = tracker.create_job("fail.pdf", 1).await.unwrap();
    tracker.mark_processing(&id).await.unwrap();
    tracker.fail_job(&id, "registration lost").await.unwrap();

    let transitioned = tracker
        .mark_page_completed(&id, 0, PageOutcome::Success("late".into()))
        .await
        .unwrap();
    assert!(!transitioned);
    assert_eq!(
        tracker.get_job_status(&id).await.unwrap().unwrap().status,
        JobStatus::Failed
    );

    let err = tracker.fail_job("no-such-job", "x").await.unwrap_err();
    assert!(matches!(err, FanoutError::JobNotFound { .. }));
    tracker.cleanup_job(&id).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_every_key() {
    let url = redis_skip_unless_ready!();
    let (store, tracker) = connect(&url).await;
    let id = tracker.create_job("clean.pdf", 2).await.unwrap();
    tracker
        .register_page_task(&id, 0, PageType::Text, "t0")
        .await
        .unwrap();
    tracker
        .mark_page_completed(&id, 0, PageOutcome::Success("a".into()))
        .await
        .unwrap();
    tracker
        .mark_page_completed(&id, 1, PageOutcome::Failure("b".into()))
        .await
        .unwrap();

    tracker.cleanup_job(&id).await.unwrap();
    for key in [
        keys::job(&id),
        keys::page(&id, 0),
        keys::page(&id, 1),
        keys::results(&id),
        keys::errors(&id),
    ] {
        assert!(store.hgetall(&key).await.unwrap().is_empty(), "{key} left behind");
    }
    assert!(tracker.get_job_status(&id).await.unwrap().is_none());
    tracker.cleanup_job(&id).await.unwrap();
}
