//! Shared state store: the single source of truth for job and page state.
//!
//! Every process (coordinator, text workers, OCR workers, assembler) talks to
//! the same store and never caches authoritative state. Correctness under
//! concurrency relies only on the primitives below being atomic per call:
//!
//! | Operation | Redis command | Used for |
//! |-----------|---------------|----------|
//! | [`StateStore::hset_multiple`] | `HSET k f v …` | initial job / page records |
//! | [`StateStore::hset_nx`] | `HSETNX` | page status that must not regress |
//! | [`StateStore::hincr`] | `HINCRBY` | per-type page counters |
//! | [`StateStore::expire`] | `EXPIRE` | job retention |
//! | [`StateStore::complete_page`] | Lua script | guarded page report + counters + job finish |
//! | [`StateStore::claim_terminal`] | Lua script | guarded job status write (`fail_job`) |
//!
//! No caller reads a composite value, modifies it, and writes it back. The
//! two guarded operations apply all of their writes or none of them, so a
//! store error never leaves a page claimed but uncounted.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::error::StoreError;
use crate::output::JobStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Set-if-absent guard field on page and job hashes.
pub const TERMINAL_FIELD: &str = "terminal";
/// Internal job counter of reported pages, successful or not.
pub const FINISHED_FIELD: &str = "finished_pages";

/// Everything one page report writes, applied by [`StateStore::complete_page`].
#[derive(Debug, Clone)]
pub struct PageCompletion {
    pub job_key: String,
    pub page_key: String,
    pub page_num: usize,
    /// `completed` or `failed`; also the value of the page guard.
    pub page_status: String,
    /// Results hash on success, errors hash on failure.
    pub output_key: String,
    /// Stored under field `{page_num}` of `output_key`.
    pub output_value: String,
    /// `completed_pages` or `failed_pages`.
    pub counter: &'static str,
    pub completed_at: String,
    pub total_pages: usize,
    pub ttl: Duration,
}

/// What [`StateStore::complete_page`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReport {
    /// The job hash does not exist; nothing was written.
    MissingJob,
    /// The page was already settled; nothing was written.
    Duplicate,
    /// Recorded. The job is unfinished, or something else already ended it.
    Recorded { finished: usize },
    /// Recorded, and this report moved the job to `status`.
    JobFinished { status: JobStatus, failed: usize },
}

/// What [`StateStore::claim_terminal`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalClaim {
    /// The key does not exist; nothing was written.
    Missing,
    /// Another writer already ended the job; nothing was written.
    Lost,
    Won,
}

/// Hash-valued key/value store with atomic field operations and key expiry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Set several fields of a hash in one command.
    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// Set one field of a hash.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Set a field only if it does not exist yet. Returns `true` if it was set.
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    /// Read one field; `None` if the key or field is absent.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Read every field of a hash; empty if the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Atomically add `delta` to an integer field and return the new value.
    ///
    /// A missing field counts as 0.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Expire `key` after `ttl`. No-op if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete keys; missing keys are ignored.
    async fn del(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Record one page report as a single atomic step.
    ///
    /// Claims the page's `terminal` field; on a win writes the page status,
    /// the output entry and both counters. When `finished_pages` reaches
    /// `total_pages` and the job's own `terminal` field is still free, also
    /// writes `status` (`completed` or `completed_with_errors`) and
    /// `completed_at`. Every touched key gets `ttl`.
    async fn complete_page(&self, report: &PageCompletion) -> Result<PageReport, StoreError>;

    /// Claim the job's `terminal` field with `owner`; on a win write `fields`
    /// and apply `ttl`, atomically.
    async fn claim_terminal(
        &self,
        key: &str,
        owner: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<TerminalClaim, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Key layout shared by every component.
pub mod keys {
    pub fn job(job_id: &str) -> String {
        format!("job:{job_id}")
    }

    pub fn page(job_id: &str, page: usize) -> String {
        format!("job:{job_id}:page:{page}")
    }

    pub fn results(job_id: &str) -> String {
        format!("job:{job_id}:results")
    }

    pub fn errors(job_id: &str) -> String {
        format!("job:{job_id}:errors")
    }
}
