//! Page workers: the consumers behind the text and OCR queues.
//!
//! A worker turns one [`PageTaskArgs`] into text and reports the outcome
//! through the [`TaskTracker`]. Workers hold no job state of their own; they
//! reopen the PDF by path on every delivery, so they can run in any process
//! that sees the same file system and store.
//!
//! ## Failure reporting
//!
//! A failed attempt is only reported to the tracker when no retry follows
//! ([`Delivery::is_final`]); earlier failures just return the error so the
//! queue retries. [`TaskHandler::on_exhausted`] reports again, which covers
//! attempts that were cancelled by the task timeout. When both fire, the
//! tracker's per-page guard drops the second report.

use crate::error::PageError;
use crate::ocr::OcrEngine;
use crate::output::PageOutcome;
use crate::pipeline::layout::{extract_text, DocumentBackend};
use crate::pipeline::normalize::normalize_page_text;
use crate::pipeline::render::render_page_to_temp;
use crate::queue::{Delivery, PageTaskArgs, TaskHandler};
use crate::tracker::TaskTracker;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Native text extraction.
pub struct TextPageWorker {
    tracker: TaskTracker,
    backend: Arc<dyn DocumentBackend>,
}

impl TextPageWorker {
    pub fn new(tracker: TaskTracker, backend: Arc<dyn DocumentBackend>) -> Self {
        Self { tracker, backend }
    }
}

#[async_trait]
impl TaskHandler for TextPageWorker {
    async fn handle(&self, args: &PageTaskArgs, delivery: Delivery) -> Result<(), PageError> {
        debug!(
            "[{}] text page {} attempt {}/{}",
            args.job_id, args.page_index, delivery.attempt, delivery.max_attempts
        );
        let result = extract_text(
            Arc::clone(&self.backend),
            PathBuf::from(&args.pdf_path),
            args.page_index,
        )
        .await
        .map(|raw| normalize_page_text(&raw));
        settle(&self.tracker, args, delivery, result, "text").await
    }

    async fn on_exhausted(&self, args: &PageTaskArgs, error: &PageError) {
        report_failure(&self.tracker, args, error).await;
    }
}

/// Rasterise + OCR.
pub struct OcrPageWorker {
    tracker: TaskTracker,
    backend: Arc<dyn DocumentBackend>,
    engine: Arc<dyn OcrEngine>,
    dpi: u32,
    temp_dir: PathBuf,
}

impl OcrPageWorker {
    pub fn new(
        tracker: TaskTracker,
        backend: Arc<dyn DocumentBackend>,
        engine: Arc<dyn OcrEngine>,
        dpi: u32,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            tracker,
            backend,
            engine,
            dpi,
            temp_dir,
        }
    }

    async fn recognize_page(&self, args: &PageTaskArgs) -> Result<String, PageError> {
        // Dropping `raster` deletes the PNG on every path out of here.
        let raster = render_page_to_temp(
            Arc::clone(&self.backend),
            args.pdf_path.as_ref(),
            args.page_index,
            self.dpi,
            &self.temp_dir,
        )
        .await?;

        let lines = self
            .engine
            .recognize(raster.path())
            .await
            .map_err(|e| PageError::OcrFailed {
                page: args.page_index,
                detail: e.to_string(),
            })?;
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl TaskHandler for OcrPageWorker {
    async fn handle(&self, args: &PageTaskArgs, delivery: Delivery) -> Result<(), PageError> {
        debug!(
            "[{}] OCR page {} with {} attempt {}/{}",
            args.job_id,
            args.page_index,
            self.engine.name(),
            delivery.attempt,
            delivery.max_attempts
        );
        let result = self.recognize_page(args).await;
        settle(&self.tracker, args, delivery, result, "ocr").await
    }

    async fn on_exhausted(&self, args: &PageTaskArgs, error: &PageError) {
        report_failure(&self.tracker, args, error).await;
    }
}

// ── Shared reporting ─────────────────────────────────────────────────────

async fn settle(
    tracker: &TaskTracker,
    args: &PageTaskArgs,
    delivery: Delivery,
    result: Result<String, PageError>,
    kind: &str,
) -> Result<(), PageError> {
    match result {
        Ok(text) => {
            let chars = text.chars().count();
            tracker
                .mark_page_completed(&args.job_id, args.page_index, PageOutcome::Success(text))
                .await
                .map_err(|e| PageError::ReportFailed {
                    page: args.page_index,
                    detail: e.to_string(),
                })?;
            info!(
                "[{}] {} page {} done ({} chars)",
                args.job_id, kind, args.page_index, chars
            );
            Ok(())
        }
        Err(e) => {
            if delivery.is_final() {
                report_failure(tracker, args, &e).await;
            }
            Err(e)
        }
    }
}

async fn report_failure(tracker: &TaskTracker, args: &PageTaskArgs, err: &PageError) {
    if let Err(report_err) = tracker
        .mark_page_completed(
            &args.job_id,
            args.page_index,
            PageOutcome::Failure(err.to_string()),
        )
        .await
    {
        error!(
            "[{}] could not record failure of page {}: {}",
            args.job_id, args.page_index, report_err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FanoutError, OcrError};
    use crate::output::JobStatus;
    use crate::pipeline::layout::DocumentLayout;
    use crate::store::MemoryStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Page 0 has text, page 1 cannot be read.
    struct TwoPages;

    impl DocumentBackend for TwoPages {
        fn inspect(&self, _path: &Path) -> Result<DocumentLayout, FanoutError> {
            Ok(DocumentLayout::default())
        }

        fn page_text(&self, _path: &Path, page_index: usize) -> Result<String, PageError> {
            match page_index {
                0 => Ok("Hello   world\r\n".into()),
                _ => Err(PageError::ExtractionFailed {
                    page: page_index,
                    detail: "corrupt content stream".into(),
                }),
            }
        }

        fn render_page_png(
            &self,
            _path: &Path,
            page_index: usize,
            _dpi: u32,
            dest: &Path,
        ) -> Result<(), PageError> {
            std::fs::write(dest, b"png").map_err(|e| PageError::RenderFailed {
                page: page_index,
                detail: e.to_string(),
            })
        }
    }

    struct Lines {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for Lines {
        async fn recognize(&self, image_path: &Path) -> Result<Vec<String>, OcrError> {
            assert!(image_path.exists());
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["line one".into(), "line two".into()])
        }
    }

    async fn job(total: usize) -> (TaskTracker, String) {
        let tracker = TaskTracker::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let id = tracker.create_job("doc.pdf", total).await.unwrap();
        (tracker, id)
    }

    fn args(job_id: &str, page: usize) -> PageTaskArgs {
        PageTaskArgs {
            pdf_path: "doc.pdf".into(),
            page_index: page,
            job_id: job_id.into(),
        }
    }

    const FIRST: Delivery = Delivery {
        attempt: 1,
        max_attempts: 2,
    };
    const LAST: Delivery = Delivery {
        attempt: 2,
        max_attempts: 2,
    };

    #[tokio::test]
    async fn text_worker_reports_normalised_text() {
        let (tracker, id) = job(1).await;
        let worker = TextPageWorker::new(tracker.clone(), Arc::new(TwoPages));
        worker.handle(&args(&id, 0), FIRST).await.unwrap();

        assert_eq!(tracker.get_results(&id).await.unwrap()[&0], "Hello world");
        let rec = tracker.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failure_is_reported_only_on_final_delivery() {
        let (tracker, id) = job(2).await;
        let worker = TextPageWorker::new(tracker.clone(), Arc::new(TwoPages));

        assert!(worker.handle(&args(&id, 1), FIRST).await.is_err());
        let rec = tracker.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.failed_pages, 0);

        let err = worker.handle(&args(&id, 1), LAST).await.unwrap_err();
        let rec = tracker.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.failed_pages, 1);
        assert_eq!(rec.errors[0].error, err.to_string());

        // The queue's exhaustion hook reports again; the guard absorbs it.
        worker.on_exhausted(&args(&id, 1), &err).await;
        let rec = tracker.get_job_status(&id).await.unwrap().unwrap();
        assert_eq!(rec.failed_pages, 1);
    }

    #[tokio::test]
    async fn ocr_worker_joins_lines_and_removes_raster() {
        let (tracker, id) = job(1).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(Lines {
            seen: AtomicUsize::new(0),
        });
        let worker = OcrPageWorker::new(
            tracker.clone(),
            Arc::new(TwoPages),
            engine.clone(),
            300,
            dir.path().to_path_buf(),
        );
        worker.handle(&args(&id, 0), FIRST).await.unwrap();

        assert_eq!(engine.seen.load(Ordering::SeqCst), 1);
        assert_eq!(
            tracker.get_results(&id).await.unwrap()[&0],
            "line one\nline two"
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
