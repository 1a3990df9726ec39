//! Error types for the pdf-fanout library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FanoutError`] is **fatal**: the calling operation cannot proceed at all
//!   (bad input file, store unreachable, unknown job). Returned as
//!   `Err(FanoutError)` from the coordinator, tracker and assembler.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (extraction glitch,
//!   OCR timeout, queue rejected the task) while every other page carries on.
//!   The message ends up in the job's error list and the page is assembled as
//!   a failure marker.
//!
//! Store and queue failures have their own small enums ([`StoreError`],
//! [`QueueError`]) so backends do not depend on the fatal type.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-fanout library.
#[derive(Debug, Error)]
pub enum FanoutError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Job errors ────────────────────────────────────────────────────────
    /// No job record exists for the id (never created, purged, or expired).
    #[error("Job '{job_id}' not found (it may have expired or been cleaned up)")]
    JobNotFound { job_id: String },

    /// A page report referenced a page the job does not have.
    #[error("Page index {page} is out of range for job '{job_id}' ({total} pages)")]
    PageOutOfRange {
        job_id: String,
        page: usize,
        total: usize,
    },

    /// The caller stopped waiting before the job reached a terminal state.
    ///
    /// In-flight page tasks keep running; the job record stays in the store.
    #[error("Job '{job_id}' did not complete within {secs}s\nCheck that workers are running.")]
    JobTimedOut { job_id: String, secs: u64 },

    /// The job was marked `failed` (dispatch aborted).
    #[error("Job '{job_id}' failed")]
    JobFailed { job_id: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The shared state store rejected or could not execute a command.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// The configured OCR provider could not be created.
    #[error("OCR provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Its `Display` text is what gets recorded in the job's error list.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Native text extraction failed.
    #[error("Page {page}: text extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The OCR engine returned an error.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The task exceeded its per-task timeout.
    #[error("Page {page}: task timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The work queue refused the task.
    #[error("Page {page}: dispatch failed: {detail}")]
    DispatchFailed { page: usize, detail: String },

    /// The outcome could not be written back to the store.
    #[error("Page {page}: could not report result: {detail}")]
    ReportFailed { page: usize, detail: String },
}

/// Errors raised by a [`crate::store::StateStore`] backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("State store connection failed ({target}): {detail}")]
    Connection { target: String, detail: String },

    /// A command was sent but failed.
    #[error("State store command {command} failed: {detail}")]
    Command { command: String, detail: String },

    /// A stored field did not have the expected shape.
    #[error("Invalid value in '{key}'.{field}: {value:?}")]
    InvalidValue {
        key: String,
        field: String,
        value: String,
    },
}

/// Errors raised by a [`crate::queue::WorkQueue`].
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The queue is shut down and accepts no more tasks.
    #[error("Queue '{queue}' is closed")]
    Closed { queue: String },

    /// The queue refused this particular task.
    #[error("Queue '{queue}' rejected the task: {reason}")]
    Rejected { queue: String, reason: String },
}

/// Errors raised by a [`crate::ocr::OcrEngine`].
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    /// The page raster could not be read or encoded.
    #[error("Could not read page image '{path}': {detail}")]
    Image { path: PathBuf, detail: String },

    /// The recognition backend kept failing.
    #[error("OCR backend failed after {attempts} attempt(s): {detail}")]
    Backend { attempts: u32, detail: String },
}
