//! Progress-callback trait for dispatch events.
//!
//! Inject an [`Arc<dyn DispatchProgressCallback>`] via
//! [`crate::config::FanoutConfigBuilder::progress_callback`] to be told how
//! each page was routed while the coordinator fans a document out.
//!
//! Page *completion* is not reported here: workers may run in other
//! processes, so completion is observed by polling the tracker (see
//! [`crate::tracker::TaskTracker::wait_with_observer`]).
//!
//! # Example
//!
//! ```rust
//! use pdf_fanout::{DispatchProgressCallback, FanoutConfig, PageType};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct OcrCounter {
//!     ocr: AtomicUsize,
//! }
//!
//! impl DispatchProgressCallback for OcrCounter {
//!     fn on_page_dispatched(&self, _page: usize, _total: usize, page_type: PageType) {
//!         if page_type == PageType::Ocr {
//!             self.ocr.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let cb = Arc::new(OcrCounter { ocr: AtomicUsize::new(0) });
//! let config = FanoutConfig::builder()
//!     .progress_callback(cb as Arc<dyn DispatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageType;
use std::sync::Arc;

/// Called by the coordinator as it classifies and dispatches each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page numbers are 0-based, matching the store.
pub trait DispatchProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is dispatched.
    fn on_dispatch_start(&self, job_id: &str, total_pages: usize) {
        let _ = (job_id, total_pages);
    }

    /// Called after a page task was accepted by its queue.
    fn on_page_dispatched(&self, page: usize, total_pages: usize, page_type: PageType) {
        let _ = (page, total_pages, page_type);
    }

    /// Called when a page could not be dispatched and was recorded as failed.
    fn on_page_dispatch_failed(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after every page has been dispatched or recorded as failed.
    fn on_dispatch_complete(&self, job_id: &str, dispatched: usize, failed: usize) {
        let _ = (job_id, dispatched, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DispatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FanoutConfig`].
pub type ProgressCallback = Arc<dyn DispatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        text: AtomicUsize,
        ocr: AtomicUsize,
        failed: AtomicUsize,
        finished: AtomicUsize,
    }

    impl DispatchProgressCallback for TrackingCallback {
        fn on_page_dispatched(&self, _page: usize, _total: usize, page_type: PageType) {
            match page_type {
                PageType::Text => self.text.fetch_add(1, Ordering::SeqCst),
                PageType::Ocr => self.ocr.fetch_add(1, Ordering::SeqCst),
            };
        }

        fn on_page_dispatch_failed(&self, _page: usize, _total: usize, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_dispatch_complete(&self, _job_id: &str, dispatched: usize, _failed: usize) {
            self.finished.store(dispatched, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_dispatch_start("j", 3);
        cb.on_page_dispatched(0, 3, PageType::Text);
        cb.on_page_dispatch_failed(1, 3, "queue down");
        cb.on_dispatch_complete("j", 2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb = TrackingCallback::default();
        cb.on_page_dispatched(0, 3, PageType::Text);
        cb.on_page_dispatched(1, 3, PageType::Ocr);
        cb.on_page_dispatch_failed(2, 3, "queue down");
        cb.on_dispatch_complete("j", 2, 1);

        assert_eq!(cb.text.load(Ordering::SeqCst), 1);
        assert_eq!(cb.ocr.load(Ordering::SeqCst), 1);
        assert_eq!(cb.failed.load(Ordering::SeqCst), 1);
        assert_eq!(cb.finished.load(Ordering::SeqCst), 2);
    }
}
