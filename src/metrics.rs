// Pipeline metrics module
//
// Lightweight counters for the detect -> queue -> upload pipeline

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Pipeline metrics shared by the detector and every upload worker
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Metrics are reported periodically alongside the queue depth and once
/// more on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Paths accepted by the detector (live events and initial scan)
    pub files_detected: AtomicUsize,

    /// Files uploaded successfully
    pub files_uploaded: AtomicUsize,

    /// Files whose upload exhausted every attempt
    pub files_failed: AtomicUsize,

    /// Files that vanished or could not be read before upload
    pub files_skipped: AtomicUsize,

    /// Upload attempts made, including retries
    pub upload_attempts: AtomicU64,

    /// Delete/move failures after a successful upload
    pub post_process_failures: AtomicUsize,

    /// Total time spent in successful uploads, in milliseconds
    pub total_upload_time_ms: AtomicU64,

    /// Service start time
    start_time: Instant,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            files_detected: AtomicUsize::new(0),
            files_uploaded: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            upload_attempts: AtomicU64::new(0),
            post_process_failures: AtomicUsize::new(0),
            total_upload_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_detected(&self) {
        self.files_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_uploaded(&self, duration: Duration) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.total_upload_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempts(&self, attempts: u32) {
        self.upload_attempts
            .fetch_add(u64::from(attempts), Ordering::Relaxed);
    }

    pub fn record_post_process_failure(&self) {
        self.post_process_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average upload time per successful file in milliseconds
    pub fn avg_upload_time_ms(&self) -> f64 {
        let total = self.total_upload_time_ms.load(Ordering::Relaxed);
        let count = self.files_uploaded.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Files that reached a terminal outcome
    pub fn files_processed(&self) -> usize {
        self.files_uploaded.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed)
            + self.files_skipped.load(Ordering::Relaxed)
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Upload Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} detected, {} uploaded, {} failed, {} skipped",
            self.files_detected.load(Ordering::Relaxed),
            self.files_uploaded.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
            self.files_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Upload attempts: {}, post-processing failures: {}, avg upload time: {:.2}ms",
            self.upload_attempts.load(Ordering::Relaxed),
            self.post_process_failures.load(Ordering::Relaxed),
            self.avg_upload_time_ms()
        );
    }

    /// Log periodic metrics together with the current queue depth
    pub fn log_periodic(&self, queue_depth: usize) {
        tracing::info!(
            "Metrics: {} files in queue, {} processed ({} uploaded, {} failed), uptime {:.0}s",
            queue_depth,
            self.files_processed(),
            self.files_uploaded.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
