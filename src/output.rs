//! Data model: job and page state as read back from the store, plus the
//! document handed to downstream stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    /// `completed` or `completed_with_errors`: every page has been reported.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Which queue a page is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    /// Native text extraction (cheap).
    Text,
    /// Rasterise + OCR (expensive).
    Ocr,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Text => "text",
            PageType::Ocr => "ocr",
        }
    }

    /// Name of the job counter incremented when a page of this type is dispatched.
    pub(crate) fn counter_field(&self) -> &'static str {
        match self {
            PageType::Text => "text_pages",
            PageType::Ocr => "ocr_pages",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(PageType::Text),
            "ocr" => Ok(PageType::Ocr),
            other => Err(format!("unknown page type '{other}'")),
        }
    }
}

/// State of a single page task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTaskStatus {
    Queued,
    Completed,
    Failed,
}

impl PageTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageTaskStatus::Queued => "queued",
            PageTaskStatus::Completed => "completed",
            PageTaskStatus::Failed => "failed",
        }
    }
}

impl FromStr for PageTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(PageTaskStatus::Queued),
            "completed" => Ok(PageTaskStatus::Completed),
            "failed" => Ok(PageTaskStatus::Failed),
            other => Err(format!("unknown page status '{other}'")),
        }
    }
}

/// Snapshot of one page task.
///
/// `page_type`, `task_id` and `created_at` are `None` when a worker reported
/// the page before the coordinator finished registering it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTaskRecord {
    pub page_num: usize,
    pub page_type: Option<PageType>,
    pub task_id: Option<String>,
    pub status: PageTaskStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// What a worker (or the coordinator, for dispatch failures) reports for a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page produced text (possibly empty for blank pages).
    Success(String),
    /// The page failed; the message is kept in the job's error list.
    Failure(String),
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Success(_))
    }
}

/// One entry of a job's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub page: usize,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a job as stored in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub pdf_path: String,
    pub total_pages: usize,
    pub completed_pages: usize,
    pub failed_pages: usize,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub text_pages: usize,
    pub ocr_pages: usize,
    /// Ordered by timestamp, then page.
    pub errors: Vec<JobErrorEntry>,
}

impl JobRecord {
    /// Pages reported so far, successful or not.
    pub fn reported_pages(&self) -> usize {
        self.completed_pages + self.failed_pages
    }
}

/// Per-job counters exposed to downstream stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub completed_pages: usize,
    pub failed_pages: usize,
    pub text_pages: usize,
    pub ocr_pages: usize,
}

impl From<&JobRecord> for StoreStats {
    fn from(record: &JobRecord) -> Self {
        Self {
            completed_pages: record.completed_pages,
            failed_pages: record.failed_pages,
            text_pages: record.text_pages,
            ocr_pages: record.ocr_pages,
        }
    }
}

/// The extracted document handed to the extraction / matching stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub pdf_path: String,
    /// All pages in order; failed pages appear as markers.
    pub full_text: String,
    /// Successful pages only, keyed by 0-based page index.
    pub page_texts: BTreeMap<usize, String>,
    pub total_pages: usize,
    pub job_id: String,
    #[serde(rename = "redis_stats")]
    pub stats: StoreStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_display() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::CompletedWithErrors,
            JobStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_completed_states_are_finished() {
        assert!(!JobStatus::Failed.is_finished());
        assert!(JobStatus::CompletedWithErrors.is_finished());
        assert!(JobStatus::Completed.is_finished());
        assert!(!JobStatus::Processing.is_finished());
    }

    #[test]
    fn processed_document_uses_wire_names() {
        let doc = ProcessedDocument {
            pdf_path: "a.pdf".into(),
            full_text: "hello".into(),
            page_texts: BTreeMap::from([(0, "hello".to_string())]),
            total_pages: 1,
            job_id: "j".into(),
            stats: StoreStats {
                completed_pages: 1,
                text_pages: 1,
                ..Default::default()
            },
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["redis_stats"]["text_pages"], 1);
        assert_eq!(v["page_texts"]["0"], "hello");
    }
}
