//! End-to-end runner: everything needed to process a PDF in one process.
//!
//! [`FanoutPipeline::local`] wires a [`TaskTracker`], two [`LocalWorkQueue`]
//! pools (text and OCR, sized independently) and a [`JobCoordinator`] over
//! one [`StateStore`]. With a Redis store the same job can be observed and
//! assembled from another process through the CLI's `status` and `assemble`
//! commands.
//!
//! # Example
//!
//! ```rust,no_run
//! use pdf_fanout::{FanoutConfig, FanoutPipeline, MemoryStore, PdfiumBackend, VisionOcrEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FanoutConfig::builder().ocr_concurrency(2).build()?;
//!     let pipeline = FanoutPipeline::local(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(PdfiumBackend::new(None)?),
//!         Arc::new(VisionOcrEngine::from_env(None, None)?),
//!         config,
//!     );
//!     let doc = pipeline.process("contract.pdf").await?;
//!     println!("{}", doc.full_text);
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::assembler::{self, ResultAssembler};
use crate::config::{FanoutConfig, OutputFormat};
use crate::coordinator::JobCoordinator;
use crate::error::FanoutError;
use crate::ocr::OcrEngine;
use crate::output::{JobRecord, ProcessedDocument, StoreStats};
use crate::pipeline::input::resolve_input;
use crate::pipeline::layout::DocumentBackend;
use crate::queue::{LocalWorkQueue, WorkQueue};
use crate::store::StateStore;
use crate::tracker::{TaskTracker, WaitOutcome};
use crate::workers::{OcrPageWorker, TextPageWorker};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Coordinator, worker pools, tracker and assembler over one store.
pub struct FanoutPipeline {
    coordinator: JobCoordinator,
    assembler: ResultAssembler,
    tracker: TaskTracker,
    text_pool: Arc<LocalWorkQueue>,
    ocr_pool: Arc<LocalWorkQueue>,
    config: FanoutConfig,
}

impl std::fmt::Debug for FanoutPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutPipeline")
            .field("coordinator", &self.coordinator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FanoutPipeline {
    /// Build the pipeline and start both worker pools.
    ///
    /// Must be called inside a tokio runtime.
    pub fn local(
        store: Arc<dyn StateStore>,
        backend: Arc<dyn DocumentBackend>,
        ocr: Arc<dyn OcrEngine>,
        config: FanoutConfig,
    ) -> Self {
        let tracker = TaskTracker::new(store, config.job_ttl());

        let text_pool = Arc::new(LocalWorkQueue::spawn(
            config.text_queue_name.clone(),
            Arc::new(TextPageWorker::new(tracker.clone(), Arc::clone(&backend))),
            config.text_concurrency,
        ));
        let ocr_pool = Arc::new(LocalWorkQueue::spawn(
            config.ocr_queue_name.clone(),
            Arc::new(OcrPageWorker::new(
                tracker.clone(),
                Arc::clone(&backend),
                ocr,
                config.ocr_dpi,
                config.temp_dir(),
            )),
            config.ocr_concurrency,
        ));

        let coordinator = JobCoordinator::new(
            tracker.clone(),
            backend,
            Arc::clone(&text_pool) as Arc<dyn WorkQueue>,
            Arc::clone(&ocr_pool) as Arc<dyn WorkQueue>,
            config.clone(),
        );

        Self {
            coordinator,
            assembler: ResultAssembler::new(tracker.clone()),
            tracker,
            text_pool,
            ocr_pool,
            config,
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn assembler(&self) -> &ResultAssembler {
        &self.assembler
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Process a local path or HTTP(S) URL and return the assembled document.
    ///
    /// Waits at most `job_timeout_secs`. On timeout the pages keep running
    /// and the job stays in the store.
    pub async fn process(&self, input: &str) -> Result<ProcessedDocument, FanoutError> {
        // Keeps a downloaded PDF on disk until every page has been read.
        let resolved = resolve_input(input, self.config.download_timeout_secs).await?;
        let job_id = self.submit(resolved.path()).await?;
        let doc = self.collect(&job_id, |_| {}).await?;

        if self.config.cleanup_on_finish {
            self.tracker.cleanup_job(&job_id).await?;
        }
        Ok(doc)
    }

    /// Dispatch a local PDF and return its job id without waiting.
    pub async fn submit(&self, pdf_path: &Path) -> Result<String, FanoutError> {
        self.coordinator.process_pdf(pdf_path).await
    }

    /// Wait for `job_id` and build its [`ProcessedDocument`].
    ///
    /// `observer` sees every polled record. The job keys are left in place.
    pub async fn collect<F>(&self, job_id: &str, observer: F) -> Result<ProcessedDocument, FanoutError>
    where
        F: FnMut(&JobRecord) + Send,
    {
        let timeout = self.config.job_timeout();
        let outcome = self
            .tracker
            .wait_with_observer(job_id, timeout, self.config.poll_interval(), observer)
            .await?;

        let record = match outcome {
            WaitOutcome::Completed(record) => record,
            WaitOutcome::Failed(_) => {
                return Err(FanoutError::JobFailed {
                    job_id: job_id.to_string(),
                })
            }
            WaitOutcome::Missing => {
                return Err(FanoutError::JobNotFound {
                    job_id: job_id.to_string(),
                })
            }
            WaitOutcome::TimedOut => {
                warn!("[{}] gave up waiting after {:?}", job_id, timeout);
                return Err(FanoutError::JobTimedOut {
                    job_id: job_id.to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };

        let results = self.tracker.get_results(job_id).await?;
        let full_text = assembler::render(&record, &results, OutputFormat::Plain)?;
        info!(
            "[{}] document ready: {}/{} pages ({} failed)",
            job_id, record.completed_pages, record.total_pages, record.failed_pages
        );

        Ok(ProcessedDocument {
            pdf_path: record.pdf_path.clone(),
            full_text,
            page_texts: results,
            total_pages: record.total_pages,
            job_id: record.job_id.clone(),
            stats: StoreStats::from(&record),
        })
    }

    /// Stop accepting pages and wait for in-flight tasks to finish.
    pub async fn shutdown(self) {
        let Self {
            coordinator,
            text_pool,
            ocr_pool,
            ..
        } = self;
        drop(coordinator);
        for pool in [text_pool, ocr_pool] {
            match Arc::try_unwrap(pool) {
                Ok(queue) => queue.shutdown().await,
                Err(shared) => warn!(
                    "Queue '{}' still shared at shutdown, not draining",
                    shared.name()
                ),
            }
        }
    }
}
