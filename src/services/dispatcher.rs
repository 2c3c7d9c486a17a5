//! Bounded pool of upload workers fed from the file queue.
//!
//! A single coordinating task takes a semaphore permit, then waits up to the
//! poll interval for the next path, and hands both to a task in a
//! [`JoinSet`]. The permit is released when that task finishes, so at most
//! `max_concurrent` files are being processed at any time.
//!
//! Stopping is cooperative: the stop signal is raced against both waits via a
//! biased `tokio::select!` that polls it first, and is re-checked between them.
//! No new path is dequeued once it has been sent. Tasks already running get
//! `drain_timeout` to finish before they are detached.

use camino::Utf8Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::post_process::{PostOutcome, apply_post_action};
use super::queue::{Dequeue, QueueReceiver};
use super::upload::{FileError, FilePayload, UploadTransport, upload_with_retry};
use crate::metrics::Metrics;
use crate::models::{DispatchSettings, PostAction, RetryPolicy, UPLOAD_SETTLE_DELAY};

/// Terminal state of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Uploaded { attempts: u32, post: PostOutcome },
    Failed { attempts: u32 },
    /// The file was gone by the time a worker picked it up
    Skipped,
    /// The file exists but could not be read; no upload was attempted
    Unreadable,
}

/// Upload pipeline for a single file: existence check, settle, read,
/// upload with retries, post-processing.
pub struct FileProcessor {
    transport: Arc<dyn UploadTransport>,
    retry: RetryPolicy,
    post_action: PostAction,
    settle_delay: Duration,
    metrics: Arc<Metrics>,
}

impl FileProcessor {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        retry: RetryPolicy,
        post_action: PostAction,
    ) -> Self {
        Self {
            transport,
            retry,
            post_action,
            settle_delay: UPLOAD_SETTLE_DELAY,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run the whole pipeline for `path`.
    ///
    /// Never returns an error: every failure is logged and folded into the
    /// outcome so that one bad file cannot take down a worker.
    pub async fn process(&self, path: &Utf8Path) -> TaskOutcome {
        if !path.exists() {
            tracing::warn!("File no longer exists: {}", path);
            self.metrics.record_skipped();
            return TaskOutcome::Skipped;
        }

        // Let the writer finish before reading
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let payload = match FilePayload::read(path).await {
            Ok(payload) => payload,
            Err(FileError::NotFound(_)) => {
                tracing::warn!("File no longer exists: {}", path);
                self.metrics.record_skipped();
                return TaskOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.metrics.record_skipped();
                return TaskOutcome::Unreadable;
            }
        };

        tracing::info!("Processing file: {} ({} bytes)", path, payload.size());
        let started = Instant::now();

        match upload_with_retry(self.transport.as_ref(), &payload, &self.retry).await {
            Ok(report) => {
                self.metrics.record_attempts(report.attempts);
                self.metrics.record_uploaded(started.elapsed());
                tracing::debug!("Upload response for {}: {}", path, report.response);

                let post = apply_post_action(&self.post_action, path).await;
                if post.is_failure() {
                    self.metrics.record_post_process_failure();
                }

                TaskOutcome::Uploaded {
                    attempts: report.attempts,
                    post,
                }
            }
            Err(failure) => {
                self.metrics.record_attempts(failure.attempts);
                self.metrics.record_failed();
                tracing::error!("{}", failure);
                TaskOutcome::Failed {
                    attempts: failure.attempts,
                }
            }
        }
    }
}

/// Result of a graceful stop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// In-flight tasks that finished within the drain timeout
    pub completed: usize,
    /// Tasks still running when the timeout expired
    pub abandoned: usize,
}

pub struct Dispatcher;

impl Dispatcher {
    /// Start the coordinating loop on the current tokio runtime.
    pub fn spawn(
        processor: Arc<FileProcessor>,
        settings: DispatchSettings,
        receiver: QueueReceiver,
    ) -> DispatcherHandle {
        let max_concurrent = settings.max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let (stop_tx, stop_rx) = watch::channel(false);
        let queue_depth = receiver.depth_counter();

        tracing::info!("Starting {} upload workers", max_concurrent);

        let loop_handle = tokio::spawn(Self::run(
            processor,
            settings.poll_interval,
            receiver,
            semaphore.clone(),
            stop_rx,
        ));

        DispatcherHandle {
            stop_tx,
            loop_handle,
            semaphore,
            max_concurrent,
            queue_depth,
        }
    }

    async fn run(
        processor: Arc<FileProcessor>,
        poll_interval: Duration,
        mut receiver: QueueReceiver,
        semaphore: Arc<Semaphore>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> JoinSet<TaskOutcome> {
        let mut tasks = JoinSet::new();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            // Stop is polled first so it always wins over a freed permit or a ready path
            let permit = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if *stop_rx.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                next = receiver.recv_timeout(poll_interval) => next,
            };

            match next {
                Dequeue::Item(path) => {
                    let processor = processor.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        processor.process(&path).await
                    });
                }
                Dequeue::Empty => {}
                Dequeue::Closed => {
                    tracing::debug!("File queue closed, dispatcher exiting");
                    break;
                }
            }

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    tracing::error!("Upload task join error: {}", e);
                }
            }
        }

        tasks
    }
}

/// Control handle for a running dispatcher
pub struct DispatcherHandle {
    stop_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<JoinSet<TaskOutcome>>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    queue_depth: Arc<AtomicUsize>,
}

impl DispatcherHandle {
    /// Paths queued but not yet picked up by a worker
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Number of files currently being processed
    pub fn active(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop dequeuing and wait up to `drain_timeout` for in-flight uploads.
    ///
    /// Tasks still running after the timeout are detached, not aborted.
    pub async fn stop(self, drain_timeout: Duration) -> DrainReport {
        let _ = self.stop_tx.send(true);

        let mut tasks = match self.loop_handle.await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("Dispatcher loop terminated abnormally: {}", e);
                return DrainReport::default();
            }
        };

        if !tasks.is_empty() {
            tracing::info!("Waiting for {} in-flight uploads", tasks.len());
        }

        let mut completed = 0;
        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(_) => completed += 1,
                    Err(e) => tracing::error!("Upload task join error: {}", e),
                }
            }
        })
        .await;

        let abandoned = if drained.is_err() {
            let remaining = tasks.len();
            tracing::warn!(
                "Drain timeout expired with {} uploads still running",
                remaining
            );
            tasks.detach_all();
            remaining
        } else {
            0
        };

        tracing::info!("Upload workers stopped");
        DrainReport {
            completed,
            abandoned,
        }
    }
}
