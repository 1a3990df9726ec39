//! # pdf-fanout
//!
//! Page-level PDF text extraction, fanned out over work queues and tracked
//! in a shared store.
//!
//! ## Why fan out?
//!
//! Most pages of a business PDF carry a native text layer that can be read
//! in milliseconds; a few are scans that need OCR, which is orders of
//! magnitude slower. Sending every page through one pipeline either wastes
//! OCR on text pages or skips scans. This crate classifies each page, sends
//! it to a cheap text queue or an expensive OCR queue, and tracks every page
//! to a terminal state in a store that outlives any single process.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Probe     page count + per-page layout (pdfium, spawn_blocking)
//!  ├─ 3. Classify  text / image / mixed / blank → text or OCR queue
//!  ├─ 4. Dispatch  create job, enqueue + register every page
//!  ├─ 5. Workers   native text or raster + OCR, report once per page
//!  └─ 6. Assemble  ordered document, failure markers for missing pages
//! ```
//!
//! The [`StateStore`] is the single source of truth. Counters only move
//! through atomic store operations, so workers in other processes can report
//! pages in any order, and more than once, without corrupting a job.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_fanout::{FanoutConfig, FanoutPipeline, MemoryStore, PdfiumBackend, VisionOcrEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = FanoutPipeline::local(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(PdfiumBackend::new(None)?),
//!         Arc::new(VisionOcrEngine::from_env(None, None)?),
//!         FanoutConfig::default(),
//!     );
//!     let doc = pipeline.process("invoice.pdf").await?;
//!     eprintln!(
//!         "{} pages: {} text, {} OCR, {} failed",
//!         doc.total_pages, doc.stats.text_pages, doc.stats.ocr_pages, doc.stats.failed_pages
//!     );
//!     println!("{}", doc.full_text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `redis` | on      | [`RedisStore`], a [`StateStore`] on a Redis server |
//! | `cli`   | on      | Enables the `pdf-fanout` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable both when embedding the library with your own store:
//! ```toml
//! pdf-fanout = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assembler;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod queue;
pub mod store;
pub mod tracker;
pub mod workers;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assembler::ResultAssembler;
pub use config::{FanoutConfig, FanoutConfigBuilder, OutputFormat};
pub use coordinator::JobCoordinator;
pub use error::{FanoutError, OcrError, PageError, QueueError, StoreError};
pub use ocr::{OcrEngine, VisionOcrEngine};
pub use output::{
    JobErrorEntry, JobRecord, JobStatus, PageOutcome, PageTaskRecord, PageTaskStatus, PageType,
    ProcessedDocument, StoreStats,
};
pub use pipeline::layout::{DocumentBackend, PdfiumBackend};
pub use process::FanoutPipeline;
pub use progress::{DispatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{Delivery, LocalWorkQueue, PageTaskArgs, RetryPolicy, TaskHandler, WorkQueue};
pub use store::{MemoryStore, StateStore};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use tracker::{TaskTracker, WaitOutcome};
pub use workers::{OcrPageWorker, TextPageWorker};
