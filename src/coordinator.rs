//! Job coordinator: probe a PDF, create its job and fan the pages out.
//!
//! The coordinator never waits for workers. Once every page has either been
//! accepted by a queue or recorded as a dispatch failure, `process_pdf`
//! returns the job id and the store becomes the only place the job lives.
//!
//! ## Failure boundaries
//!
//! * A page whose layout could not be read is routed to OCR.
//! * A queue refusing a page fails that page alone; the rest proceeds.
//! * A store error is fatal: the job is marked `failed` (best effort) and the
//!   error is returned, since the tracker can no longer be trusted to reach a
//!   terminal state.

use crate::config::FanoutConfig;
use crate::error::{FanoutError, PageError};
use crate::output::{PageOutcome, PageType};
use crate::pipeline::classify::{route_page, route_unreadable, Thresholds};
use crate::pipeline::layout::{inspect_document, DocumentBackend, DocumentLayout};
use crate::queue::{PageTaskArgs, WorkQueue};
use crate::tracker::TaskTracker;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Classifies pages and hands them to the text or OCR queue.
pub struct JobCoordinator {
    tracker: TaskTracker,
    backend: Arc<dyn DocumentBackend>,
    text_queue: Arc<dyn WorkQueue>,
    ocr_queue: Arc<dyn WorkQueue>,
    config: FanoutConfig,
}

impl std::fmt::Debug for JobCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("tracker", &self.tracker)
            .field("text_queue", &self.text_queue.name())
            .field("ocr_queue", &self.ocr_queue.name())
            .finish_non_exhaustive()
    }
}

impl JobCoordinator {
    pub fn new(
        tracker: TaskTracker,
        backend: Arc<dyn DocumentBackend>,
        text_queue: Arc<dyn WorkQueue>,
        ocr_queue: Arc<dyn WorkQueue>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            tracker,
            backend,
            text_queue,
            ocr_queue,
            config,
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Create a job for `pdf_path` and dispatch every page. Returns the job id.
    ///
    /// `pdf_path` is stored verbatim in the page tasks, so it must be
    /// readable by whichever process runs the workers.
    pub async fn process_pdf(&self, pdf_path: &Path) -> Result<String, FanoutError> {
        let start = Instant::now();
        let path_str = pdf_path.to_string_lossy().into_owned();
        info!("Inspecting {}", path_str);

        // ── Step 1: Probe every page in one blocking pass ───────────────
        let layout = inspect_document(Arc::clone(&self.backend), pdf_path.to_path_buf()).await?;
        let total = layout.page_count();

        // ── Step 2: Create the job ───────────────────────────────────────
        let job_id = self.tracker.create_job(&path_str, total).await?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_dispatch_start(&job_id, total);
        }
        if total == 0 {
            info!("[{}] document has no pages, nothing to dispatch", job_id);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_dispatch_complete(&job_id, 0, 0);
            }
            return Ok(job_id);
        }

        // ── Step 3: Dispatch ─────────────────────────────────────────────
        let (dispatched, failed) = match self.dispatch_pages(&job_id, &path_str, &layout).await {
            Ok(counts) => counts,
            Err(e) => {
                error!("[{}] dispatch aborted: {}", job_id, e);
                if let Err(mark_err) = self.tracker.fail_job(&job_id, &e.to_string()).await {
                    warn!("[{}] could not mark job failed: {}", job_id, mark_err);
                }
                return Err(e);
            }
        };

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_dispatch_complete(&job_id, dispatched, failed);
        }
        info!(
            "[{}] dispatched {} of {} pages in {}ms ({} dispatch failures)",
            job_id,
            dispatched,
            total,
            start.elapsed().as_millis(),
            failed
        );
        Ok(job_id)
    }

    async fn dispatch_pages(
        &self,
        job_id: &str,
        pdf_path: &str,
        layout: &DocumentLayout,
    ) -> Result<(usize, usize), FanoutError> {
        self.tracker.mark_processing(job_id).await?;

        let thresholds = Thresholds::from(&self.config);
        let policy = self.config.retry_policy();
        let total = layout.page_count();
        let mut dispatched = 0;
        let mut failed = 0;

        for (page_index, probe) in layout.pages.iter().enumerate() {
            let route = match probe {
                Ok(page) => route_page(page, &thresholds),
                Err(reason) => {
                    warn!(
                        "[{}] page {} layout unreadable ({}), routing to OCR",
                        job_id, page_index, reason
                    );
                    route_unreadable()
                }
            };
            debug!(
                "[{}] page {}: class={} scanned={} text={} -> {}",
                job_id, page_index, route.class, route.scanned, route.has_text, route.page_type
            );

            let queue = match route.page_type {
                PageType::Text => &self.text_queue,
                PageType::Ocr => &self.ocr_queue,
            };
            let args = PageTaskArgs {
                pdf_path: pdf_path.to_string(),
                page_index,
                job_id: job_id.to_string(),
            };

            match queue.enqueue(args, policy).await {
                Ok(task_id) => {
                    self.tracker
                        .register_page_task(job_id, page_index, route.page_type, &task_id)
                        .await?;
                    dispatched += 1;
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_page_dispatched(page_index, total, route.page_type);
                    }
                }
                Err(e) => {
                    let err = PageError::DispatchFailed {
                        page: page_index,
                        detail: e.to_string(),
                    };
                    error!("[{}] {}", job_id, err);
                    self.tracker
                        .mark_page_completed(job_id, page_index, PageOutcome::Failure(err.to_string()))
                        .await?;
                    failed += 1;
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_page_dispatch_failed(page_index, total, &err.to_string());
                    }
                }
            }
        }

        Ok((dispatched, failed))
    }
}
