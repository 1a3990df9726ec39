//! Work queues: named task queues with a bounded pool of consumers.
//!
//! ## Why two pools?
//!
//! Text extraction takes milliseconds; OCR takes seconds and lots of memory.
//! Each page type gets its own [`WorkQueue`] with its own concurrency limit so
//! a backlog of scans never delays the cheap pages behind them.
//!
//! ## Delivery semantics
//!
//! A task is delivered up to [`RetryPolicy::max_attempts`] times. Every
//! attempt runs under [`RetryPolicy::timeout`]; a failed or timed-out attempt
//! is retried after [`RetryPolicy::retry_delay`]. Once the last attempt fails
//! the handler's [`TaskHandler::on_exhausted`] hook runs so the page can be
//! recorded as failed. Delivery is at-least-once: handlers must tolerate
//! seeing the same page twice.

use crate::error::{PageError, QueueError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Retry behaviour attached to every enqueued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Limit for a single attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Total deliveries: the first attempt plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Payload of a page task. Serialisable so a broker-backed queue can carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTaskArgs {
    pub pdf_path: String,
    pub page_index: usize,
    pub job_id: String,
}

/// Which attempt a handler is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl Delivery {
    /// No retry follows this attempt.
    pub fn is_final(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Consumer side of a queue.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process one delivery of a task.
    async fn handle(&self, args: &PageTaskArgs, delivery: Delivery) -> Result<(), PageError>;

    /// Called once after the final attempt failed or timed out.
    async fn on_exhausted(&self, args: &PageTaskArgs, error: &PageError) {
        error!(
            "Task for page {} of job {} exhausted its retries: {}",
            args.page_index, args.job_id, error
        );
    }
}

/// Producer side of a queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a task and return its id. An error means the task was not accepted.
    async fn enqueue(&self, args: PageTaskArgs, policy: RetryPolicy) -> Result<String, QueueError>;
}

// ── In-process queue ─────────────────────────────────────────────────────

struct Envelope {
    task_id: String,
    args: PageTaskArgs,
    policy: RetryPolicy,
}

/// A [`WorkQueue`] backed by a tokio channel and a pool of at most
/// `concurrency` handler tasks.
pub struct LocalWorkQueue {
    name: String,
    tx: mpsc::UnboundedSender<Envelope>,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for LocalWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWorkQueue")
            .field("name", &self.name)
            .finish()
    }
}

impl LocalWorkQueue {
    /// Start the consumer pool. Must be called inside a tokio runtime.
    pub fn spawn(
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        concurrency: usize,
    ) -> Self {
        let name = name.into();
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(name.clone(), rx, handler, concurrency));
        info!("Queue '{}' started with {} workers", name, concurrency);
        Self {
            name,
            tx,
            dispatcher,
        }
    }

    /// Stop accepting tasks and wait until every accepted task has finished.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.dispatcher.await {
            error!("Queue '{}' dispatcher ended abnormally: {}", self.name, e);
        }
    }
}

#[async_trait]
impl WorkQueue for LocalWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, args: PageTaskArgs, policy: RetryPolicy) -> Result<String, QueueError> {
        let task_id = Uuid::new_v4().to_string();
        self.tx
            .send(Envelope {
                task_id: task_id.clone(),
                args,
                policy,
            })
            .map_err(|_| QueueError::Closed {
                queue: self.name.clone(),
            })?;
        Ok(task_id)
    }
}

async fn dispatch_loop(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    handler: Arc<dyn TaskHandler>,
    concurrency: usize,
) {
    let slots = Arc::new(Semaphore::new(concurrency));

    while let Some(envelope) = rx.recv().await {
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let handler = Arc::clone(&handler);
        let queue = name.clone();
        tokio::spawn(async move {
            run_task(&queue, handler.as_ref(), envelope).await;
            drop(permit);
        });
    }

    // Drain: wait for every in-flight task to give its permit back.
    let _ = slots.acquire_many(concurrency as u32).await;
    debug!("Queue '{}' drained", name);
}

async fn run_task(queue: &str, handler: &dyn TaskHandler, envelope: Envelope) {
    let Envelope {
        task_id,
        args,
        policy,
    } = envelope;
    let max_attempts = policy.max_attempts();
    let mut last_err: Option<PageError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            warn!(
                "[{}] task {} page {}: retry {}/{} after {:?}",
                queue,
                task_id,
                args.page_index,
                attempt - 1,
                policy.max_retries,
                policy.retry_delay
            );
            tokio::time::sleep(policy.retry_delay).await;
        }

        let delivery = Delivery {
            attempt,
            max_attempts,
        };
        match tokio::time::timeout(policy.timeout, handler.handle(&args, delivery)).await {
            Ok(Ok(())) => {
                debug!("[{}] task {} done on attempt {}", queue, task_id, attempt);
                return;
            }
            Ok(Err(e)) => {
                warn!("[{}] task {} attempt {} failed: {}", queue, task_id, attempt, e);
                last_err = Some(e);
            }
            Err(_) => {
                let e = PageError::Timeout {
                    page: args.page_index,
                    secs: policy.timeout.as_secs(),
                };
                warn!("[{}] task {} attempt {} timed out", queue, task_id, attempt);
                last_err = Some(e);
            }
        }
    }

    if let Some(e) = last_err {
        handler.on_exhausted(&args, &e).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `fail_first` deliveries, then succeeds.
    struct Flaky {
        fail_first: u32,
        calls: AtomicU32,
        finals: Mutex<Vec<bool>>,
        exhausted: AtomicUsize,
    }

    impl Flaky {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                calls: AtomicU32::new(0),
                finals: Mutex::new(Vec::new()),
                exhausted: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, args: &PageTaskArgs, delivery: Delivery) -> Result<(), PageError> {
            self.finals.lock().unwrap().push(delivery.is_final());
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(PageError::ExtractionFailed {
                    page: args.page_index,
                    detail: format!("attempt {n}"),
                });
            }
            Ok(())
        }

        async fn on_exhausted(&self, _args: &PageTaskArgs, _error: &PageError) {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Sleepy {
        exhausted_with: Mutex<Option<PageError>>,
    }

    #[async_trait]
    impl TaskHandler for Sleepy {
        async fn handle(&self, _args: &PageTaskArgs, _delivery: Delivery) -> Result<(), PageError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn on_exhausted(&self, _args: &PageTaskArgs, error: &PageError) {
            *self.exhausted_with.lock().unwrap() = Some(error.clone());
        }
    }

    fn args(page: usize) -> PageTaskArgs {
        PageTaskArgs {
            pdf_path: "/tmp/doc.pdf".into(),
            page_index: page,
            job_id: "job-1".into(),
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn delivery_final_flag() {
        let d = Delivery {
            attempt: 4,
            max_attempts: 4,
        };
        assert!(d.is_final());
        assert!(!Delivery {
            attempt: 1,
            max_attempts: 4
        }
        .is_final());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let handler = Flaky::new(2);
        let q = LocalWorkQueue::spawn("text", handler.clone(), 1);
        q.enqueue(args(0), policy(3)).await.unwrap();
        q.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 0);
        assert_eq!(*handler.finals.lock().unwrap(), vec![false, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let handler = Flaky::new(u32::MAX);
        let q = LocalWorkQueue::spawn("text", handler.clone(), 2);
        q.enqueue(args(0), policy(2)).await.unwrap();
        q.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 1);
        assert_eq!(*handler.finals.lock().unwrap(), vec![false, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failed_attempt() {
        let handler = Arc::new(Sleepy {
            exhausted_with: Mutex::new(None),
        });
        let q = LocalWorkQueue::spawn("ocr", handler.clone(), 1);
        q.enqueue(args(7), policy(0)).await.unwrap();
        q.shutdown().await;

        let err = handler.exhausted_with.lock().unwrap().clone();
        assert!(matches!(err, Some(PageError::Timeout { page: 7, secs: 5 })));
    }

    #[tokio::test]
    async fn task_ids_are_unique() {
        let q = LocalWorkQueue::spawn("text", Flaky::new(0), 4);
        let a = q.enqueue(args(0), policy(0)).await.unwrap();
        let b = q.enqueue(args(1), policy(0)).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(q.name(), "text");
        q.shutdown().await;
    }
}
