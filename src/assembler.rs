//! Result assembly: turn a finished job's page results into one document.
//!
//! Pages are emitted in ascending order, exactly `total_pages` of them. A
//! page with no stored result (failed, or never reported) is replaced by a
//! format-specific marker, so the reader can see where text is missing.
//! Display page numbers are 1-based; the JSON form keeps the 0-based store
//! indices.

use crate::config::OutputFormat;
use crate::error::FanoutError;
use crate::output::JobRecord;
use crate::tracker::TaskTracker;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Builds documents from the tracker's stored results.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    tracker: TaskTracker,
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    job_id: &'a str,
    pdf_path: &'a str,
    total_pages: usize,
    completed_pages: usize,
    failed_pages: usize,
    missing_pages: Vec<usize>,
    pages: &'a BTreeMap<usize, String>,
}

impl ResultAssembler {
    pub fn new(tracker: TaskTracker) -> Self {
        Self { tracker }
    }

    /// Assemble the job's document in `format`.
    ///
    /// Returns `Ok(None)` unless the job is `completed` or
    /// `completed_with_errors` (no side effects), and
    /// [`FanoutError::JobNotFound`] for an unknown job. A `failed` job may
    /// still have pages in flight, so it is never assembled.
    pub async fn assemble(
        &self,
        job_id: &str,
        format: OutputFormat,
    ) -> Result<Option<String>, FanoutError> {
        let record = self
            .tracker
            .get_job_status(job_id)
            .await?
            .ok_or_else(|| FanoutError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if !record.status.is_finished() {
            debug!(
                "[{}] not assembling, job is {}",
                job_id, record.status
            );
            return Ok(None);
        }

        let results = self.tracker.get_results(job_id).await?;
        let document = render(&record, &results, format)?;
        info!(
            "[{}] assembled {} pages as {:?} ({} missing, {} chars)",
            job_id,
            record.total_pages,
            format,
            missing_pages(&record, &results).len(),
            document.chars().count()
        );
        Ok(Some(document))
    }
}

/// Indices in `0..total_pages` with no stored text.
pub fn missing_pages(record: &JobRecord, results: &BTreeMap<usize, String>) -> Vec<usize> {
    (0..record.total_pages)
        .filter(|p| !results.contains_key(p))
        .collect()
}

/// Render a finished job. Pure; used by the runner for its plain text too.
pub fn render(
    record: &JobRecord,
    results: &BTreeMap<usize, String>,
    format: OutputFormat,
) -> Result<String, FanoutError> {
    if format == OutputFormat::Json {
        let doc = JsonDocument {
            job_id: &record.job_id,
            pdf_path: &record.pdf_path,
            total_pages: record.total_pages,
            completed_pages: record.completed_pages,
            failed_pages: record.failed_pages,
            missing_pages: missing_pages(record, results),
            pages: results,
        };
        return serde_json::to_string_pretty(&doc)
            .map_err(|e| FanoutError::Internal(format!("JSON assembly failed: {}", e)));
    }

    let pages: Vec<String> = (0..record.total_pages)
        .map(|p| format_page(p + 1, results.get(&p).map(String::as_str), format))
        .collect();
    let body = pages.join("\n\n");

    Ok(match format {
        OutputFormat::Plain => body,
        _ => format!("{}\n\n{}", header(record, format), body),
    })
}

fn format_page(page_num: usize, text: Option<&str>, format: OutputFormat) -> String {
    match (format, text) {
        (OutputFormat::Markdown, Some(t)) => format!("## Page {}\n\n{}", page_num, t),
        (OutputFormat::Markdown, None) => format!("## Page {}\n\n*[processing failed]*", page_num),
        (OutputFormat::Text, t) => {
            let rule = "=".repeat(60);
            format!(
                "{rule}\nPAGE {}\n{rule}\n\n{}",
                page_num,
                t.unwrap_or("[PROCESSING FAILED]")
            )
        }
        (_, Some(t)) => t.to_string(),
        (_, None) => format!("[page {}: processing failed]", page_num),
    }
}

fn header(record: &JobRecord, format: OutputFormat) -> String {
    if format == OutputFormat::Markdown {
        return format!(
            "# PDF extraction result\n\n\
             **File:** {}\n\
             **Job ID:** {}\n\
             **Total pages:** {}\n\
             **Completed:** {}\n\
             **Failed:** {}\n\
             **Status:** {}\n\n\
             ---",
            record.pdf_path,
            record.job_id,
            record.total_pages,
            record.completed_pages,
            record.failed_pages,
            record.status
        );
    }

    let rule = "=".repeat(80);
    format!(
        "{rule}\nPDF EXTRACTION RESULT\n{rule}\n\n\
         File: {}\n\
         Job ID: {}\n\
         Total pages: {}\n\
         Completed: {}\n\
         Failed: {}\n\
         Status: {}\n\n\
         {rule}",
        record.pdf_path,
        record.job_id,
        record.total_pages,
        record.completed_pages,
        record.failed_pages,
        record.status
    )
}
