//! CLI binary for pdf-fanout.
//!
//! `run` processes a document in this process (coordinator plus both worker
//! pools). `status`, `assemble` and `cleanup` work on jobs kept in Redis, so
//! they can inspect a run started elsewhere.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_fanout::pipeline::input::resolve_input;
use pdf_fanout::{
    DispatchProgressCallback, FanoutConfig, FanoutPipeline, JobRecord, MemoryStore, OcrEngine,
    OcrError, OutputFormat, PageType, PdfiumBackend, RedisStore, ResultAssembler, StateStore,
    TaskTracker, VisionOcrEngine,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress using indicatif ─────────────────────────────────────────────

/// One bar for the whole run: it counts dispatched pages first, then
/// reported pages while waiting.
struct CliProgress {
    bar: ProgressBar,
    ocr: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Inspecting PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            ocr: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize, prefix: &'static str) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(prefix);
    }

    /// Poll observer for the wait phase.
    fn observe(&self, record: &JobRecord) {
        self.bar.set_position(record.reported_pages() as u64);
        self.bar.set_message(format!("{} failed", record.failed_pages));
    }
}

impl DispatchProgressCallback for CliProgress {
    fn on_dispatch_start(&self, job_id: &str, total_pages: usize) {
        self.activate_bar(total_pages, "Dispatching");
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("Job {job_id}")),
            dim(&format!("{total_pages} pages"))
        ));
    }

    fn on_page_dispatched(&self, _page: usize, _total: usize, page_type: PageType) {
        if page_type == PageType::Ocr {
            self.ocr.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.inc(1);
    }

    fn on_page_dispatch_failed(&self, page: usize, total: usize, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page + 1,
            total,
            red(error)
        ));
        self.bar.inc(1);
    }

    fn on_dispatch_complete(&self, _job_id: &str, dispatched: usize, failed: usize) {
        let ocr = self.ocr.load(Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {} pages queued  {}",
            green("✓"),
            dispatched,
            dim(&format!(
                "{} text, {} OCR, {} dispatch failures",
                dispatched - ocr.min(dispatched),
                ocr,
                failed
            ))
        ));
        self.activate_bar(dispatched + failed, "Processing");
    }
}

/// Stand-in when no vision provider is configured: text pages still work,
/// OCR pages fail with the configuration error.
struct UnconfiguredOcr {
    reason: String,
}

#[async_trait]
impl OcrEngine for UnconfiguredOcr {
    async fn recognize(&self, _image_path: &Path) -> Result<Vec<String>, OcrError> {
        Err(OcrError::Backend {
            attempts: 0,
            detail: self.reason.clone(),
        })
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a PDF in this process, state kept in memory
  pdf-fanout run invoice.pdf

  # Same, with job state in Redis and a Markdown report
  pdf-fanout --redis-url redis://localhost:6379/0 run scans.pdf --format markdown -o scans.md

  # Full ProcessedDocument as JSON
  pdf-fanout run https://example.com/contract.pdf --format document > contract.json

  # Inspect, re-assemble or delete a job kept in Redis
  pdf-fanout status 5f0c…
  pdf-fanout assemble 5f0c… --format text
  pdf-fanout cleanup 5f0c…

ENVIRONMENT VARIABLES:
  REDIS_URL               Redis connection URL for the shared job store
  OPENAI_API_KEY          OpenAI API key (vision OCR)
  ANTHROPIC_API_KEY       Anthropic API key (vision OCR)
  EDGEQUAKE_LLM_PROVIDER  Override OCR provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override OCR model ID
  PDFIUM_LIB_PATH         Path to libpdfium or the directory containing it
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Fan PDF pages out to text and OCR workers and track them in a shared store.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-fanout",
    version,
    about = "Page-level PDF text extraction over text and OCR work queues",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Redis URL for job state. `run` keeps state in memory without it.
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Job retention in the store, in seconds.
    #[arg(long, global = true, env = "FANOUT_JOB_TTL", default_value_t = 86_400)]
    job_ttl: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FANOUT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FANOUT_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a PDF (local path or HTTP/HTTPS URL) and print the result.
    Run(RunArgs),
    /// Show a job's status.
    Status {
        job_id: String,
        /// Print the job record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Assemble a finished job's pages.
    Assemble {
        job_id: String,
        #[arg(long, value_enum, default_value = "text")]
        format: FormatArg,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete every key of a job.
    Cleanup { job_id: String },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Output layout; `document` prints the full ProcessedDocument as JSON.
    #[arg(long, env = "FANOUT_FORMAT", value_enum, default_value = "plain")]
    format: RunFormatArg,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "FANOUT_OUTPUT")]
    output: Option<PathBuf>,

    /// Delete the job's keys once the result has been produced.
    #[arg(long, env = "FANOUT_CLEANUP")]
    cleanup: bool,

    /// OCR provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    ocr_provider: Option<String>,

    /// OCR model ID (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    ocr_model: Option<String>,

    /// Rendering DPI for OCR pages (72–600).
    #[arg(long, env = "FANOUT_OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Concurrent text-extraction tasks.
    #[arg(long, env = "FANOUT_TEXT_CONCURRENCY", default_value_t = 4)]
    text_concurrency: usize,

    /// Concurrent OCR tasks.
    #[arg(long, env = "FANOUT_OCR_CONCURRENCY", default_value_t = 2)]
    ocr_concurrency: usize,

    /// Retries per page task after the first attempt.
    #[arg(long, env = "FANOUT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delay between page retries in milliseconds.
    #[arg(long, env = "FANOUT_RETRY_DELAY_MS", default_value_t = 5_000)]
    retry_delay_ms: u64,

    /// Per-task timeout in seconds.
    #[arg(long, env = "FANOUT_TASK_TIMEOUT", default_value_t = 600)]
    task_timeout: u64,

    /// How long to wait for the whole job, in seconds.
    #[arg(long, env = "FANOUT_JOB_TIMEOUT", default_value_t = 600)]
    job_timeout: u64,

    /// Status poll interval in milliseconds.
    #[arg(long, env = "FANOUT_POLL_INTERVAL_MS", default_value_t = 2_000)]
    poll_interval_ms: u64,

    /// Image coverage above which an image-dominated page is OCR'd.
    #[arg(long, env = "FANOUT_IMAGE_THRESHOLD", default_value_t = 0.5)]
    image_threshold: f64,

    /// Text coverage above which a page counts as text-dominated.
    #[arg(long, env = "FANOUT_TEXT_THRESHOLD", default_value_t = 0.1)]
    text_threshold: f64,

    /// Directory for temporary page rasters.
    #[arg(long, env = "FANOUT_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "FANOUT_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FANOUT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "FANOUT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Plain,
    Text,
    Markdown,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Plain => OutputFormat::Plain,
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RunFormatArg {
    Plain,
    Text,
    Markdown,
    Json,
    Document,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `run`.
    let show_progress = matches!(&cli.command, Command::Run(args) if !args.no_progress)
        && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let ttl = Duration::from_secs(cli.job_ttl);
    match &cli.command {
        Command::Run(args) => run(&cli, args, show_progress).await,
        Command::Status { job_id, json } => {
            let tracker = TaskTracker::new(redis_store(&cli).await?, ttl);
            let record = tracker
                .get_job_status(job_id)
                .await
                .context("Failed to read job status")?
                .with_context(|| format!("Job '{job_id}' not found"))?;
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&record).context("Failed to serialise job")?
                );
            } else {
                print_status(&record);
            }
            Ok(())
        }
        Command::Assemble {
            job_id,
            format,
            output,
        } => {
            let tracker = TaskTracker::new(redis_store(&cli).await?, ttl);
            let text = ResultAssembler::new(tracker)
                .assemble(job_id, (*format).into())
                .await
                .context("Assembly failed")?;
            match text {
                Some(text) => write_output(output.as_deref(), &text),
                None => bail!("Job '{job_id}' has no document: it is still running or failed"),
            }
        }
        Command::Cleanup { job_id } => {
            let tracker = TaskTracker::new(redis_store(&cli).await?, ttl);
            tracker
                .cleanup_job(job_id)
                .await
                .context("Cleanup failed")?;
            if !cli.quiet {
                eprintln!("{} removed job {}", green("✔"), job_id);
            }
            Ok(())
        }
    }
}

async fn run(cli: &Cli, args: &RunArgs, show_progress: bool) -> Result<()> {
    let progress = show_progress.then(CliProgress::new);
    let config = build_config(cli, args, progress.clone())?;

    let store: Arc<dyn StateStore> = match cli.redis_url {
        Some(_) => redis_store(cli).await?,
        None => Arc::new(MemoryStore::new()),
    };
    let backend = PdfiumBackend::new(args.password.clone()).context("Failed to load pdfium")?;
    let ocr: Arc<dyn OcrEngine> =
        match VisionOcrEngine::from_env(args.ocr_provider.as_deref(), args.ocr_model.as_deref()) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                warn!("OCR disabled: {}", e);
                Arc::new(UnconfiguredOcr {
                    reason: e.to_string(),
                })
            }
        };

    let pipeline = FanoutPipeline::local(store, Arc::new(backend), ocr, config);

    // The resolved input keeps a downloaded PDF alive until assembly.
    let resolved = resolve_input(&args.input, args.download_timeout)
        .await
        .context("Failed to open input")?;
    let job_id = pipeline
        .submit(resolved.path())
        .await
        .context("Dispatch failed")?;

    let observer = {
        let progress = progress.clone();
        move |record: &JobRecord| {
            if let Some(ref p) = progress {
                p.observe(record);
            }
        }
    };
    let doc = pipeline
        .collect(&job_id, observer)
        .await
        .with_context(|| format!("Job {job_id} did not complete"))?;
    if let Some(ref p) = progress {
        p.bar.finish_and_clear();
    }

    let text = match args.format {
        RunFormatArg::Document => {
            serde_json::to_string_pretty(&doc).context("Failed to serialise document")?
        }
        RunFormatArg::Plain => doc.full_text.clone(),
        RunFormatArg::Text => assemble(&pipeline, &job_id, OutputFormat::Text).await?,
        RunFormatArg::Markdown => assemble(&pipeline, &job_id, OutputFormat::Markdown).await?,
        RunFormatArg::Json => assemble(&pipeline, &job_id, OutputFormat::Json).await?,
    };

    if args.cleanup {
        pipeline
            .tracker()
            .cleanup_job(&job_id)
            .await
            .context("Cleanup failed")?;
    }
    write_output(args.output.as_deref(), &text)?;

    if !cli.quiet {
        let s = &doc.stats;
        eprintln!(
            "{}  {}/{} pages  {}  {}",
            if s.failed_pages == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            s.completed_pages,
            doc.total_pages,
            dim(&format!("{} text / {} OCR", s.text_pages, s.ocr_pages)),
            if s.failed_pages == 0 {
                dim(&format!("job {job_id}"))
            } else {
                red(&format!("{} failed", s.failed_pages))
            },
        );
    }

    pipeline.shutdown().await;
    Ok(())
}

async fn assemble(pipeline: &FanoutPipeline, job_id: &str, format: OutputFormat) -> Result<String> {
    pipeline
        .assembler()
        .assemble(job_id, format)
        .await
        .context("Assembly failed")?
        .with_context(|| format!("Job '{job_id}' has not finished yet"))
}

/// Map CLI args to `FanoutConfig`.
fn build_config(
    cli: &Cli,
    args: &RunArgs,
    progress: Option<Arc<CliProgress>>,
) -> Result<FanoutConfig> {
    let mut builder = FanoutConfig::builder()
        .image_coverage_threshold(args.image_threshold)
        .text_coverage_threshold(args.text_threshold)
        .max_retries(args.max_retries)
        .retry_delay_ms(args.retry_delay_ms)
        .task_timeout_secs(args.task_timeout)
        .job_ttl_secs(cli.job_ttl)
        .ocr_dpi(args.dpi)
        .text_concurrency(args.text_concurrency)
        .ocr_concurrency(args.ocr_concurrency)
        .job_timeout_secs(args.job_timeout)
        .poll_interval_ms(args.poll_interval_ms)
        .download_timeout_secs(args.download_timeout);

    if let Some(ref dir) = args.temp_dir {
        builder = builder.temp_dir(dir.clone());
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb as Arc<dyn DispatchProgressCallback>);
    }

    builder.build().context("Invalid configuration")
}

async fn redis_store(cli: &Cli) -> Result<Arc<dyn StateStore>> {
    let Some(ref url) = cli.redis_url else {
        bail!("This command needs a Redis store: pass --redis-url or set REDIS_URL");
    };
    let store = RedisStore::connect(url)
        .await
        .context("Failed to connect to Redis")?;
    Ok(Arc::new(store))
}

fn print_status(record: &JobRecord) {
    println!("Job:          {}", record.job_id);
    println!("File:         {}", record.pdf_path);
    println!("Status:       {}", record.status);
    println!(
        "Pages:        {}/{} reported ({} completed, {} failed)",
        record.reported_pages(),
        record.total_pages,
        record.completed_pages,
        record.failed_pages
    );
    println!(
        "Routing:      {} text, {} OCR",
        record.text_pages, record.ocr_pages
    );
    println!("Created:      {}", record.created_at.to_rfc3339());
    if let Some(done) = record.completed_at {
        println!("Finished:     {}", done.to_rfc3339());
    }
    for e in &record.errors {
        println!("  page {:>3}: {}", e.page + 1, e.error);
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}
