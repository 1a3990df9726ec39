//! Configuration for page classification, dispatch, and job tracking.
//!
//! All behaviour is controlled through [`FanoutConfig`], built via its
//! [`FanoutConfigBuilder`]. The same config is shared by the coordinator, the
//! worker pools and the tracker, so a single value describes one deployment.
//!
//! Defaults match the production settings of the queue workers: 0.5 / 0.1
//! coverage thresholds, 3 retries 5 s apart, 10 minute task timeout, 24 h
//! job retention.

use crate::error::FanoutError;
use crate::progress::ProgressCallback;
use crate::queue::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a fan-out deployment.
///
/// # Example
/// ```rust
/// use pdf_fanout::FanoutConfig;
///
/// let config = FanoutConfig::builder()
///     .ocr_concurrency(4)
///     .max_retries(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 5);
/// ```
#[derive(Clone)]
pub struct FanoutConfig {
    /// Image coverage above which an image-dominated page is OCR'd. Default: 0.5.
    pub image_coverage_threshold: f64,

    /// Text coverage above which a page counts as text-dominated. Default: 0.1.
    pub text_coverage_threshold: f64,

    /// A single image covering at least this share of the page marks it as a
    /// scan. Default: 0.95.
    pub scan_coverage_threshold: f64,

    /// Minimum trimmed character count for a page to have extractable text. Default: 50.
    pub min_text_chars: usize,

    /// Retries per page task after the first attempt. Default: 3.
    pub max_retries: u32,

    /// Delay between retries in milliseconds. Default: 5000.
    pub retry_delay_ms: u64,

    /// Per-task timeout in seconds, enforced by the queue runtime. Default: 600.
    pub task_timeout_secs: u64,

    /// Retention of job keys in the store, in seconds. Default: 86 400 (24 h).
    pub job_ttl_secs: u64,

    /// Rendering DPI for OCR pages. Range: 72–600. Default: 300.
    ///
    /// OCR accuracy on small print drops sharply below 200 DPI; 300 is the
    /// usual scanning resolution.
    pub ocr_dpi: u32,

    /// Concurrent text-extraction tasks. Default: 4.
    pub text_concurrency: usize,

    /// Concurrent OCR tasks. Default: 2.
    ///
    /// Kept separate from `text_concurrency` so an OCR backlog never starves
    /// text pages.
    pub ocr_concurrency: usize,

    /// How long [`crate::process::FanoutPipeline::process`] waits for a job, in seconds. Default: 600.
    pub job_timeout_secs: u64,

    /// Status poll interval while waiting, in milliseconds. Default: 2000.
    pub poll_interval_ms: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Name of the text-extraction queue. Default: `text_page_queue`.
    pub text_queue_name: String,

    /// Name of the OCR queue. Default: `ocr_page_queue`.
    pub ocr_queue_name: String,

    /// Directory for temporary page rasters. Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Delete job keys from the store once the document has been assembled. Default: false.
    pub cleanup_on_finish: bool,

    /// Optional dispatch progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            image_coverage_threshold: 0.5,
            text_coverage_threshold: 0.1,
            scan_coverage_threshold: 0.95,
            min_text_chars: 50,
            max_retries: 3,
            retry_delay_ms: 5_000,
            task_timeout_secs: 600,
            job_ttl_secs: 86_400,
            ocr_dpi: 300,
            text_concurrency: 4,
            ocr_concurrency: 2,
            job_timeout_secs: 600,
            poll_interval_ms: 2_000,
            download_timeout_secs: 120,
            text_queue_name: "text_page_queue".to_string(),
            ocr_queue_name: "ocr_page_queue".to_string(),
            temp_dir: None,
            password: None,
            cleanup_on_finish: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FanoutConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutConfig")
            .field("image_coverage_threshold", &self.image_coverage_threshold)
            .field("text_coverage_threshold", &self.text_coverage_threshold)
            .field("scan_coverage_threshold", &self.scan_coverage_threshold)
            .field("min_text_chars", &self.min_text_chars)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("task_timeout_secs", &self.task_timeout_secs)
            .field("job_ttl_secs", &self.job_ttl_secs)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("text_concurrency", &self.text_concurrency)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("text_queue_name", &self.text_queue_name)
            .field("ocr_queue_name", &self.ocr_queue_name)
            .field("temp_dir", &self.temp_dir)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn DispatchProgressCallback>"),
            )
            .finish()
    }
}

impl FanoutConfig {
    /// Create a new builder for `FanoutConfig`.
    pub fn builder() -> FanoutConfigBuilder {
        FanoutConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry policy attached to every dispatched page task.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: Duration::from_secs(self.task_timeout_secs),
        }
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Temp directory for rasters, falling back to the system default.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`FanoutConfig`].
#[derive(Debug)]
pub struct FanoutConfigBuilder {
    config: FanoutConfig,
}

impl FanoutConfigBuilder {
    pub fn image_coverage_threshold(mut self, t: f64) -> Self {
        self.config.image_coverage_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn text_coverage_threshold(mut self, t: f64) -> Self {
        self.config.text_coverage_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn scan_coverage_threshold(mut self, t: f64) -> Self {
        self.config.scan_coverage_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn task_timeout_secs(mut self, secs: u64) -> Self {
        self.config.task_timeout_secs = secs.max(1);
        self
    }

    pub fn job_ttl_secs(mut self, secs: u64) -> Self {
        self.config.job_ttl_secs = secs.max(1);
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn text_concurrency(mut self, n: usize) -> Self {
        self.config.text_concurrency = n.max(1);
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn text_queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.text_queue_name = name.into();
        self
    }

    pub fn ocr_queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.ocr_queue_name = name.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn cleanup_on_finish(mut self, v: bool) -> Self {
        self.config.cleanup_on_finish = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FanoutConfig, FanoutError> {
        let c = &self.config;
        if c.poll_interval_ms == 0 {
            return Err(FanoutError::InvalidConfig(
                "Poll interval must be > 0 ms".into(),
            ));
        }
        if c.text_queue_name.is_empty() || c.ocr_queue_name.is_empty() {
            return Err(FanoutError::InvalidConfig(
                "Queue names must not be empty".into(),
            ));
        }
        if c.text_queue_name == c.ocr_queue_name {
            return Err(FanoutError::InvalidConfig(format!(
                "Text and OCR queues must differ, both are '{}'",
                c.text_queue_name
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Layout of an assembled document.
///
/// | Format | Use case |
/// |--------|----------|
/// | `Plain` | Feeding the text to an extraction model |
/// | `Text` | Human-readable report with a job header and page banners |
/// | `Markdown` | Same report as Markdown |
/// | `Json` | Structured record with job metadata and missing pages |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Page texts joined by blank lines. (default)
    #[default]
    Plain,
    Text,
    Markdown,
    Json,
}
