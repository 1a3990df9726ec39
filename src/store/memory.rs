//! In-process [`StateStore`] for single-process runs and tests.
//!
//! One `tokio::sync::Mutex` guards the whole map, so each trait call is
//! atomic just like a single Redis command or script. Expiry is lazy: an
//! expired key is dropped the next time anything touches it.

use super::{
    PageCompletion, PageReport, StateStore, TerminalClaim, FINISHED_FIELD, TERMINAL_FIELD,
};
use crate::error::StoreError;
use crate::output::JobStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

/// A [`StateStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    entries.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let expired = entries
        .get(key)
        .and_then(|e| e.expires_at)
        .is_some_and(|at| at <= Instant::now());
    if expired {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn int_field(key: &str, entry: &Entry, field: &str) -> Result<i64, StoreError> {
    match entry.fields.get(field) {
        Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Command {
            command: "HINCRBY".into(),
            detail: format!("{key}.{field} is not an integer: {raw:?}"),
        }),
        None => Ok(0),
    }
}

fn live_or_insert<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> &'a mut Entry {
    if live(entries, key).is_none() {
        entries.insert(key.to_string(), Entry::default());
    }
    entries.entry(key.to_string()).or_default()
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = live_or_insert(&mut entries, key);
        for (field, value) in fields {
            entry.fields.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        live_or_insert(&mut entries, key)
            .fields
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = live_or_insert(&mut entries, key);
        if entry.fields.contains_key(field) {
            return Ok(false);
        }
        entry.fields.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).and_then(|e| e.fields.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key)
            .map(|e| e.fields.clone())
            .unwrap_or_default())
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = live_or_insert(&mut entries, key);
        let next = int_field(key, entry, field)? + delta;
        entry.fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = live(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn complete_page(&self, report: &PageCompletion) -> Result<PageReport, StoreError> {
        let mut entries = self.entries.lock().await;

        // Everything that can fail is checked before the first write.
        let (counter, finished, failed, job_open) = match live(&mut entries, &report.job_key) {
            None => return Ok(PageReport::MissingJob),
            Some(job) => {
                let counter = int_field(&report.job_key, job, report.counter)? + 1;
                let finished = int_field(&report.job_key, job, FINISHED_FIELD)? + 1;
                let failed = if report.counter == "failed_pages" {
                    counter
                } else {
                    int_field(&report.job_key, job, "failed_pages")?
                };
                (counter, finished, failed, !job.fields.contains_key(TERMINAL_FIELD))
            }
        };
        if live(&mut entries, &report.page_key)
            .is_some_and(|page| page.fields.contains_key(TERMINAL_FIELD))
        {
            return Ok(PageReport::Duplicate);
        }

        let expires_at = Some(Instant::now() + report.ttl);
        let page = live_or_insert(&mut entries, &report.page_key);
        for (field, value) in [
            (TERMINAL_FIELD, report.page_status.clone()),
            ("page_num", report.page_num.to_string()),
            ("status", report.page_status.clone()),
            ("completed_at", report.completed_at.clone()),
        ] {
            page.fields.insert(field.to_string(), value);
        }
        page.expires_at = expires_at;

        let output = live_or_insert(&mut entries, &report.output_key);
        output
            .fields
            .insert(report.page_num.to_string(), report.output_value.clone());
        output.expires_at = expires_at;

        let job = live_or_insert(&mut entries, &report.job_key);
        job.fields
            .insert(report.counter.to_string(), counter.to_string());
        job.fields
            .insert(FINISHED_FIELD.to_string(), finished.to_string());
        job.expires_at = expires_at;

        if finished != report.total_pages as i64 || !job_open {
            return Ok(PageReport::Recorded {
                finished: finished as usize,
            });
        }
        let status = if failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        };
        job.fields
            .insert(TERMINAL_FIELD.to_string(), "pages".to_string());
        job.fields
            .insert("status".to_string(), status.as_str().to_string());
        job.fields
            .insert("completed_at".to_string(), report.completed_at.clone());
        Ok(PageReport::JobFinished {
            status,
            failed: failed as usize,
        })
    }

    async fn claim_terminal(
        &self,
        key: &str,
        owner: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<TerminalClaim, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = live(&mut entries, key) else {
            return Ok(TerminalClaim::Missing);
        };
        if entry.fields.contains_key(TERMINAL_FIELD) {
            return Ok(TerminalClaim::Lost);
        }
        entry
            .fields
            .insert(TERMINAL_FIELD.to_string(), owner.to_string());
        for (field, value) in fields {
            entry.fields.insert((*field).to_string(), value.clone());
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(TerminalClaim::Won)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
