//! Job and page state machine, persisted in the shared store.
//!
//! ## Why no locks?
//!
//! Workers run in other tasks (or other processes) and report pages in any
//! order, possibly twice. The tracker never reads a value, changes it and
//! writes it back. Instead every page report is one
//! [`StateStore::complete_page`] call:
//!
//! 1. The page's `terminal` field lets exactly one report per page through;
//!    later reports are duplicates and change nothing.
//! 2. The winner stores its result or error and bumps `completed_pages` or
//!    `failed_pages` plus the internal `finished_pages` counter.
//! 3. The report that brings `finished_pages` to `total_pages` claims the
//!    job's own `terminal` field and writes the final status.
//!
//! [`TaskTracker::fail_job`] claims the same job field, so a job ends once
//! whichever path gets there first. All of it happens in one store call:
//! an error leaves nothing half-written and the report can be retried.
//!
//! Every write re-applies the job TTL to the key it touched, so a key created
//! late (results, errors) never outlives or underlives the job.

use crate::error::{FanoutError, StoreError};
use crate::output::{
    JobErrorEntry, JobRecord, JobStatus, PageOutcome, PageTaskRecord, PageTaskStatus, PageType,
};
use crate::store::{
    keys, PageCompletion, PageReport, StateStore, TerminalClaim, FINISHED_FIELD, TERMINAL_FIELD,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of waiting on a job.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// `completed` or `completed_with_errors`.
    Completed(JobRecord),
    /// The job was marked `failed`.
    Failed(JobRecord),
    /// The job record does not exist (never created, cleaned up, or expired).
    Missing,
    /// The wait timed out; the job may still finish later.
    TimedOut,
}

/// Reads and writes job state through a [`StateStore`].
#[derive(Clone)]
pub struct TaskTracker {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl std::fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracker")
            .field("store", &self.store.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TaskTracker {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Create a job record and return its new id.
    ///
    /// A zero-page document is created directly as `completed`.
    pub async fn create_job(&self, pdf_path: &str, total_pages: usize) -> Result<String, FanoutError> {
        let job_id = Uuid::new_v4().to_string();
        let job_key = keys::job(&job_id);

        // A fresh UUID should never collide, but stale data under the id must
        // not leak into this job.
        self.store
            .del(&[job_key.clone(), keys::results(&job_id), keys::errors(&job_id)])
            .await?;

        let now = timestamp(Utc::now());
        let status = if total_pages == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Pending
        };
        let mut fields: Vec<(&str, String)> = vec![
            ("job_id", job_id.clone()),
            ("pdf_path", pdf_path.to_string()),
            ("total_pages", total_pages.to_string()),
            ("completed_pages", "0".into()),
            ("failed_pages", "0".into()),
            (FINISHED_FIELD, "0".into()),
            ("status", status.as_str().into()),
            ("created_at", now.clone()),
            ("text_pages", "0".into()),
            ("ocr_pages", "0".into()),
        ];
        if total_pages == 0 {
            fields.push(("completed_at", now));
            fields.push((TERMINAL_FIELD, "empty".into()));
        }
        self.store.hset_multiple(&job_key, &fields).await?;
        self.store.expire(&job_key, self.ttl).await?;

        info!(
            "[{}] Job created for '{}' ({} pages, status {})",
            job_id, pdf_path, total_pages, status
        );
        Ok(job_id)
    }

    /// Move a job to `processing`. Called once, before the first dispatch.
    pub async fn mark_processing(&self, job_id: &str) -> Result<(), FanoutError> {
        self.total_pages(job_id).await?;
        let job_key = keys::job(job_id);
        self.store
            .hset(&job_key, "status", JobStatus::Processing.as_str())
            .await?;
        self.store.expire(&job_key, self.ttl).await?;
        debug!("[{}] status -> processing", job_id);
        Ok(())
    }

    /// Record that a page task was handed to a queue.
    ///
    /// `status` is written only if absent: a worker that already reported the
    /// page keeps its terminal status.
    pub async fn register_page_task(
        &self,
        job_id: &str,
        page_index: usize,
        page_type: PageType,
        task_id: &str,
    ) -> Result<(), FanoutError> {
        let page_key = keys::page(job_id, page_index);
        self.store
            .hset_multiple(
                &page_key,
                &[
                    ("page_num", page_index.to_string()),
                    ("page_type", page_type.as_str().to_string()),
                    ("task_id", task_id.to_string()),
                    ("created_at", timestamp(Utc::now())),
                ],
            )
            .await?;
        self.store
            .hset_nx(&page_key, "status", PageTaskStatus::Queued.as_str())
            .await?;
        self.store.expire(&page_key, self.ttl).await?;

        let job_key = keys::job(job_id);
        self.store
            .hincr(&job_key, page_type.counter_field(), 1)
            .await?;
        self.store.expire(&job_key, self.ttl).await?;
        debug!(
            "[{}] page {} registered on {} queue (task {})",
            job_id, page_index, page_type, task_id
        );
        Ok(())
    }

    /// Record the terminal outcome of a page.
    ///
    /// Returns `true` only for the single call that moved the job to a
    /// terminal status. Duplicate reports for a page return `false` and
    /// change nothing. On a store error nothing was written, so the report
    /// can simply be retried.
    pub async fn mark_page_completed(
        &self,
        job_id: &str,
        page_index: usize,
        outcome: PageOutcome,
    ) -> Result<bool, FanoutError> {
        let total = self.total_pages(job_id).await?;
        if page_index >= total {
            return Err(FanoutError::PageOutOfRange {
                job_id: job_id.to_string(),
                page: page_index,
                total,
            });
        }

        let now = Utc::now();
        let (page_status, output_key, output_value, counter, error) = match outcome {
            PageOutcome::Success(text) => (
                PageTaskStatus::Completed,
                keys::results(job_id),
                text,
                "completed_pages",
                None,
            ),
            PageOutcome::Failure(error) => {
                let entry = JobErrorEntry {
                    page: page_index,
                    error,
                    timestamp: now,
                };
                let json = serde_json::to_string(&entry)
                    .map_err(|e| FanoutError::Internal(format!("error entry: {e}")))?;
                (
                    PageTaskStatus::Failed,
                    keys::errors(job_id),
                    json,
                    "failed_pages",
                    Some(entry.error),
                )
            }
        };
        let chars = output_value.len();

        let report = self
            .store
            .complete_page(&PageCompletion {
                job_key: keys::job(job_id),
                page_key: keys::page(job_id, page_index),
                page_num: page_index,
                page_status: page_status.as_str().to_string(),
                output_key,
                output_value,
                counter,
                completed_at: timestamp(now),
                total_pages: total,
                ttl: self.ttl,
            })
            .await?;

        let finished = match report {
            PageReport::MissingJob => {
                return Err(FanoutError::JobNotFound {
                    job_id: job_id.to_string(),
                })
            }
            PageReport::Duplicate => {
                warn!(
                    "[{}] duplicate report for page {} ignored",
                    job_id, page_index
                );
                return Ok(false);
            }
            PageReport::Recorded { .. } => false,
            PageReport::JobFinished { status, failed } => {
                info!(
                    "[{}] all {} pages reported, status -> {} ({} failed)",
                    job_id, total, status, failed
                );
                true
            }
        };
        match error {
            None => debug!("[{}] page {} completed ({} chars)", job_id, page_index, chars),
            Some(error) => warn!("[{}] page {} failed: {}", job_id, page_index, error),
        }
        Ok(finished)
    }

    /// Mark a job `failed`.
    ///
    /// Claims the same guard as the last page report, so a job ends once:
    /// a job that already finished is left alone, and a failed job is never
    /// finished later by its pages.
    pub async fn fail_job(&self, job_id: &str, reason: &str) -> Result<(), FanoutError> {
        let job_key = keys::job(job_id);
        let claim = self
            .store
            .claim_terminal(
                &job_key,
                JobStatus::Failed.as_str(),
                &[
                    ("status", JobStatus::Failed.as_str().to_string()),
                    ("completed_at", timestamp(Utc::now())),
                    ("failure_reason", reason.to_string()),
                ],
                self.ttl,
            )
            .await?;
        match claim {
            TerminalClaim::Missing => Err(FanoutError::JobNotFound {
                job_id: job_id.to_string(),
            }),
            TerminalClaim::Lost => {
                warn!("[{}] not failing a job that already ended", job_id);
                Ok(())
            }
            TerminalClaim::Won => {
                warn!("[{}] job failed: {}", job_id, reason);
                Ok(())
            }
        }
    }

    /// Delete every key of a job. Missing keys are not an error.
    pub async fn cleanup_job(&self, job_id: &str) -> Result<(), FanoutError> {
        let job_key = keys::job(job_id);
        let total = match self.store.hget(&job_key, "total_pages").await? {
            Some(raw) => parse_count(&job_key, "total_pages", &raw)?,
            None => 0,
        };
        let mut doomed: Vec<String> = (0..total).map(|n| keys::page(job_id, n)).collect();
        doomed.push(job_key);
        doomed.push(keys::results(job_id));
        doomed.push(keys::errors(job_id));
        self.store.del(&doomed).await?;
        info!("[{}] cleaned up {} keys", job_id, doomed.len());
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Current job record, or `None` if the job does not exist.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobRecord>, FanoutError> {
        let job_key = keys::job(job_id);
        let raw = self.store.hgetall(&job_key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let errors = self.get_errors(job_id).await?;
        Ok(Some(parse_job(&job_key, job_id, &raw, errors)?))
    }

    /// Successful page texts keyed by page index.
    pub async fn get_results(&self, job_id: &str) -> Result<BTreeMap<usize, String>, FanoutError> {
        let results_key = keys::results(job_id);
        let raw = self.store.hgetall(&results_key).await?;
        let mut results = BTreeMap::new();
        for (page, text) in raw {
            let n = page.parse::<usize>().map_err(|_| StoreError::InvalidValue {
                key: results_key.clone(),
                field: page.clone(),
                value: "non-numeric page field".into(),
            })?;
            results.insert(n, text);
        }
        Ok(results)
    }

    /// State of one page task, or `None` if nothing was recorded for it.
    pub async fn get_page_task(
        &self,
        job_id: &str,
        page_index: usize,
    ) -> Result<Option<PageTaskRecord>, FanoutError> {
        let page_key = keys::page(job_id, page_index);
        let raw = self.store.hgetall(&page_key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let status = raw
            .get("status")
            .map(|s| {
                PageTaskStatus::from_str(s).map_err(|_| invalid(&page_key, "status", s))
            })
            .transpose()?
            .unwrap_or(PageTaskStatus::Queued);
        let page_type = raw
            .get("page_type")
            .map(|s| PageType::from_str(s).map_err(|_| invalid(&page_key, "page_type", s)))
            .transpose()?;
        Ok(Some(PageTaskRecord {
            page_num: page_index,
            page_type,
            task_id: raw.get("task_id").cloned(),
            status,
            created_at: optional_stamp(&page_key, &raw, "created_at")?,
            completed_at: optional_stamp(&page_key, &raw, "completed_at")?,
        }))
    }

    // ── Waiting ──────────────────────────────────────────────────────────

    /// Wait until the job finishes. `false` on timeout, failure or a missing job.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<bool, FanoutError> {
        Ok(matches!(
            self.wait_for_outcome(job_id, timeout, poll_interval).await?,
            WaitOutcome::Completed(_)
        ))
    }

    /// Wait until the job reaches a terminal state or `timeout` elapses.
    pub async fn wait_for_outcome(
        &self,
        job_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<WaitOutcome, FanoutError> {
        self.wait_with_observer(job_id, timeout, poll_interval, |_| {})
            .await
    }

    /// Like [`Self::wait_for_outcome`], handing every polled record to `observer`.
    ///
    /// Sleeps `min(poll_interval, remaining)` between checks, so a timeout
    /// shorter than the poll interval returns on time.
    pub async fn wait_with_observer<F>(
        &self,
        job_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        mut observer: F,
    ) -> Result<WaitOutcome, FanoutError>
    where
        F: FnMut(&JobRecord) + Send,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match self.get_job_status(job_id).await? {
                None => return Ok(WaitOutcome::Missing),
                Some(record) => {
                    observer(&record);
                    if record.status.is_finished() {
                        return Ok(WaitOutcome::Completed(record));
                    }
                    if record.status == JobStatus::Failed {
                        return Ok(WaitOutcome::Failed(record));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("[{}] wait timed out after {:?}", job_id, timeout);
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn total_pages(&self, job_id: &str) -> Result<usize, FanoutError> {
        let job_key = keys::job(job_id);
        let raw = self
            .store
            .hget(&job_key, "total_pages")
            .await?
            .ok_or_else(|| FanoutError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        Ok(parse_count(&job_key, "total_pages", &raw)?)
    }

    async fn get_errors(&self, job_id: &str) -> Result<Vec<JobErrorEntry>, FanoutError> {
        let errors_key = keys::errors(job_id);
        let raw = self.store.hgetall(&errors_key).await?;
        let mut errors = raw
            .into_iter()
            .map(|(field, json)| {
                serde_json::from_str::<JobErrorEntry>(&json)
                    .map_err(|_| invalid(&errors_key, &field, &json))
            })
            .collect::<Result<Vec<_>, _>>()?;
        errors.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.page.cmp(&b.page)));
        Ok(errors)
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn invalid(key: &str, field: &str, value: &str) -> StoreError {
    StoreError::InvalidValue {
        key: key.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_count(key: &str, field: &str, raw: &str) -> Result<usize, StoreError> {
    raw.parse::<usize>().map_err(|_| invalid(key, field, raw))
}

fn parse_status(key: &str, raw: &str) -> Result<JobStatus, StoreError> {
    JobStatus::from_str(raw).map_err(|_| invalid(key, "status", raw))
}

fn parse_stamp(key: &str, field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid(key, field, raw))
}

fn optional_stamp(
    key: &str,
    raw: &HashMap<String, String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.get(field)
        .map(|v| parse_stamp(key, field, v))
        .transpose()
}

fn parse_job(
    key: &str,
    job_id: &str,
    raw: &HashMap<String, String>,
    errors: Vec<JobErrorEntry>,
) -> Result<JobRecord, StoreError> {
    let required = |field: &str| -> Result<String, StoreError> {
        raw.get(field)
            .cloned()
            .ok_or_else(|| invalid(key, field, "<missing>"))
    };
    let count = |field: &str| -> Result<usize, StoreError> {
        match raw.get(field) {
            Some(v) => parse_count(key, field, v),
            None => Ok(0),
        }
    };

    Ok(JobRecord {
        job_id: raw.get("job_id").cloned().unwrap_or_else(|| job_id.to_string()),
        pdf_path: required("pdf_path")?,
        total_pages: parse_count(key, "total_pages", &required("total_pages")?)?,
        completed_pages: count("completed_pages")?,
        failed_pages: count("failed_pages")?,
        status: parse_status(key, &required("status")?)?,
        created_at: parse_stamp(key, "created_at", &required("created_at")?)?,
        completed_at: optional_stamp(key, raw, "completed_at")?,
        text_pages: count("text_pages")?,
        ocr_pages: count("ocr_pages")?,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `outages` page reports, then behaves like `inner`.
    struct FlakyStore {
        inner: MemoryStore,
        outages: AtomicUsize,
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
            self.inner.hset_multiple(key, fields).await
        }
        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
            self.inner.hset(key, field, value).await
        }
        async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
            self.inner.hset_nx(key, field, value).await
        }
        async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
            self.inner.hget(key, field).await
        }
        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
            self.inner.hgetall(key).await
        }
        async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
            self.inner.hincr(key, field, delta).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.inner.expire(key, ttl).await
        }
        async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
            self.inner.del(keys).await
        }
        async fn complete_page(&self, report: &PageCompletion) -> Result<PageReport, StoreError> {
            let left = self.outages.load(Ordering::SeqCst);
            if left > 0 {
                self.outages.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Command {
                    command: "EVALSHA".into(),
                    detail: "connection reset".into(),
                });
            }
            self.inner.complete_page(report).await
        }
        async fn claim_terminal(
            &self,
            key: &str,
            owner: &str,
            fields: &[(&str, String)],
            ttl: Duration,
        ) -> Result<TerminalClaim, StoreError> {
            self.inner.claim_terminal(key, owner, fields, ttl).await
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn tracker() -> (Arc<MemoryStore>, TaskTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = TaskTracker::new(store.clone(), Duration::from_secs(86_400));
        (store, tracker)
    }

    #[tokio::test]
    async fn create_job_writes_pending_record() {
        let (store, t) = tracker();
        let id = t.create_job("/data/a.pdf", 3).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Pending);
        assert_eq!(rec.total_pages, 3);
        assert_eq!(rec.reported_pages(), 0);
        assert!(rec.completed_at.is_none());
        assert!(rec.errors.is_empty());
        assert!(store.ttl(&keys::job(&id)).await.is_some());
    }

    #[tokio::test]
    async fn zero_page_job_is_completed_immediately() {
        let (_, t) = tracker();
        let id = t.create_job("/data/empty.pdf", 0).await.unwrap();
        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert!(rec.completed_at.is_some());
    }

    #[tokio::test]
    async fn last_report_transitions_exactly_once() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 2).await.unwrap();
        t.mark_processing(&id).await.unwrap();

        let first = t
            .mark_page_completed(&id, 1, PageOutcome::Success("one".into()))
            .await
            .unwrap();
        assert!(!first);
        let second = t
            .mark_page_completed(&id, 0, PageOutcome::Failure("bad scan".into()))
            .await
            .unwrap();
        assert!(second);

        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::CompletedWithErrors);
        assert_eq!(rec.completed_pages, 1);
        assert_eq!(rec.failed_pages, 1);
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.errors[0].page, 0);
        assert_eq!(rec.errors[0].error, "bad scan");
        assert!(rec.completed_at.is_some());

        let results = t.get_results(&id).await.unwrap();
        assert_eq!(results, BTreeMap::from([(1, "one".to_string())]));
    }

    #[tokio::test]
    async fn duplicate_reports_change_nothing() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 2).await.unwrap();
        t.mark_page_completed(&id, 0, PageOutcome::Success("first".into()))
            .await
            .unwrap();
        let dup = t
            .mark_page_completed(&id, 0, PageOutcome::Success("second".into()))
            .await
            .unwrap();
        assert!(!dup);
        t.mark_page_completed(&id, 0, PageOutcome::Failure("late".into()))
            .await
            .unwrap();

        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.completed_pages, 1);
        assert_eq!(rec.failed_pages, 0);
        assert_eq!(rec.status, JobStatus::Pending);
        assert_eq!(t.get_results(&id).await.unwrap()[&0], "first");
    }

    #[tokio::test]
    async fn out_of_range_and_unknown_job_are_errors() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 2).await.unwrap();
        let err = t
            .mark_page_completed(&id, 2, PageOutcome::Success(String::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::PageOutOfRange { page: 2, total: 2, .. }));

        let err = t
            .mark_page_completed("nope", 0, PageOutcome::Success(String::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::JobNotFound { .. }));
        assert!(t.get_job_status("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_registration_keeps_terminal_status() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 2).await.unwrap();
        t.mark_page_completed(&id, 0, PageOutcome::Success("fast".into()))
            .await
            .unwrap();
        t.register_page_task(&id, 0, PageType::Text, "task-0")
            .await
            .unwrap();

        let page = t.get_page_task(&id, 0).await.unwrap().unwrap();
        assert_eq!(page.status, PageTaskStatus::Completed);
        assert_eq!(page.page_type, Some(PageType::Text));
        assert_eq!(page.task_id.as_deref(), Some("task-0"));

        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.text_pages, 1);
    }

    #[tokio::test]
    async fn fail_job_leaves_finished_jobs_alone() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 1).await.unwrap();
        t.fail_job(&id, "dispatch aborted").await.unwrap();
        assert_eq!(
            t.get_job_status(&id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );

        let done = t.create_job("b.pdf", 0).await.unwrap();
        t.fail_job(&done, "too late").await.unwrap();
        assert_eq!(
            t.get_job_status(&done).await.unwrap().unwrap().status,
            JobStatus::Completed
        );

        let err = t.fail_job("ghost", "nothing to fail").await.unwrap_err();
        assert!(matches!(err, FanoutError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn report_after_store_error_is_counted() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            outages: AtomicUsize::new(1),
        });
        let t = TaskTracker::new(store, Duration::from_secs(60));
        let id = t.create_job("a.pdf", 1).await.unwrap();
        t.mark_processing(&id).await.unwrap();

        assert!(t
            .mark_page_completed(&id, 0, PageOutcome::Success("text".into()))
            .await
            .is_err());
        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Processing);
        assert_eq!(rec.reported_pages(), 0);
        assert!(t.get_results(&id).await.unwrap().is_empty());

        let retried = t
            .mark_page_completed(&id, 0, PageOutcome::Success("text".into()))
            .await
            .unwrap();
        assert!(retried);
        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert_eq!(rec.completed_pages, 1);
    }

    #[tokio::test]
    async fn failed_job_is_not_finished_by_late_reports() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 1).await.unwrap();
        t.mark_processing(&id).await.unwrap();
        t.fail_job(&id, "page registration lost").await.unwrap();

        let transitioned = t
            .mark_page_completed(&id, 0, PageOutcome::Success("late".into()))
            .await
            .unwrap();
        assert!(!transitioned);
        let rec = t.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        // The page itself is still recorded.
        assert_eq!(rec.completed_pages, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fail_job_racing_last_report_ends_job_once() {
        for _ in 0..50 {
            let (_, t) = tracker();
            let id = t.create_job("a.pdf", 1).await.unwrap();
            t.mark_processing(&id).await.unwrap();

            let report = {
                let t = t.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    t.mark_page_completed(&id, 0, PageOutcome::Success("x".into()))
                        .await
                        .unwrap()
                })
            };
            let fail = {
                let t = t.clone();
                let id = id.clone();
                tokio::spawn(async move { t.fail_job(&id, "aborted").await.unwrap() })
            };
            let finished_by_page = report.await.unwrap();
            fail.await.unwrap();

            let status = t.get_job_status(&id).await.unwrap().unwrap().status;
            if finished_by_page {
                assert_eq!(status, JobStatus::Completed);
            } else {
                assert_eq!(status, JobStatus::Failed);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_at_timeout_not_poll_interval() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 1).await.unwrap();

        let started = Instant::now();
        let done = t
            .wait_for_completion(&id, Duration::from_secs(1), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!done);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sees_completion_and_missing_jobs() {
        let (_, t) = tracker();
        let id = t.create_job("a.pdf", 1).await.unwrap();

        let waiter = {
            let t = t.clone();
            let id = id.clone();
            tokio::spawn(async move {
                t.wait_for_outcome(&id, Duration::from_secs(60), Duration::from_secs(2))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        t.mark_page_completed(&id, 0, PageOutcome::Success("x".into()))
            .await
            .unwrap();
        assert!(matches!(
            waiter.await.unwrap().unwrap(),
            WaitOutcome::Completed(_)
        ));

        let missing = t
            .wait_for_outcome("ghost", Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(missing, WaitOutcome::Missing));
    }

    #[tokio::test]
    async fn cleanup_removes_every_key() {
        let (store, t) = tracker();
        let id = t.create_job("a.pdf", 2).await.unwrap();
        t.register_page_task(&id, 0, PageType::Text, "t0")
            .await
            .unwrap();
        t.register_page_task(&id, 1, PageType::Ocr, "t1")
            .await
            .unwrap();
        t.mark_page_completed(&id, 0, PageOutcome::Success("a".into()))
            .await
            .unwrap();
        t.mark_page_completed(&id, 1, PageOutcome::Failure("b".into()))
            .await
            .unwrap();
        assert!(!store.is_empty().await);

        t.cleanup_job(&id).await.unwrap();
        assert!(store.is_empty().await);
        // Second cleanup of a missing job is fine.
        t.cleanup_job(&id).await.unwrap();
    }
}
