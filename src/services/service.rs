use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;

use super::detector::{DEDUP_MAX_ENTRIES, DedupSet, Detector, MODIFY_SETTLE_DELAY};
use super::dispatcher::{Dispatcher, DispatcherHandle, DrainReport, FileProcessor};
use super::queue::{FileQueue, file_queue};
use super::upload::UploadTransport;
use super::watcher::FsWatcher;
use crate::metrics::Metrics;
use crate::models::{DispatchSettings, ServiceConfig};

struct Running {
    queue: FileQueue,
    watcher: FsWatcher,
    dispatcher: DispatcherHandle,
}

/// Wires detector, queue, dispatcher and filesystem watcher into one service.
///
/// Start-up order matters: the queue and detector are built first, the
/// initial scan (if enabled) fills the queue, the workers start, and only then
/// is the notification watcher armed.
pub struct WatcherService {
    config: ServiceConfig,
    transport: Arc<dyn UploadTransport>,
    metrics: Arc<Metrics>,
    dispatch: DispatchSettings,
    modify_settle: Duration,
    running: Option<Running>,
}

impl WatcherService {
    /// Create a stopped service.
    ///
    /// # Arguments
    /// * `config` - Validated service configuration
    /// * `transport` - Upload transport shared by every worker
    pub fn new(config: ServiceConfig, transport: Arc<dyn UploadTransport>) -> Self {
        let dispatch = config.dispatch_settings();
        Self {
            config,
            transport,
            metrics: Arc::new(Metrics::new()),
            dispatch,
            modify_settle: MODIFY_SETTLE_DELAY,
            running: None,
        }
    }

    /// Override dispatcher tuning derived from the configuration
    pub fn with_dispatch_settings(mut self, dispatch: DispatchSettings) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_modify_settle(mut self, settle: Duration) -> Self {
        self.modify_settle = settle;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Files waiting in the queue; zero when stopped
    pub fn queue_depth(&self) -> usize {
        self.running
            .as_ref()
            .map(|running| running.queue.depth())
            .unwrap_or(0)
    }

    /// Uploads currently in progress
    pub fn active_uploads(&self) -> usize {
        self.running
            .as_ref()
            .map(|running| running.dispatcher.active())
            .unwrap_or(0)
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("Service is already running");
        }

        let spec = self.config.watch_spec();
        tracing::info!("Starting {} on {}", self.config.service.name, spec.root);
        tracing::info!("API endpoint: {}", self.config.api.endpoint);
        tracing::info!("File patterns: {:?}", spec.patterns);

        let (queue, receiver) = file_queue();
        let detector = Arc::new(
            Detector::new(&spec, queue.clone())?
                .with_dedup(DedupSet::new(DEDUP_MAX_ENTRIES, self.config.dedup_ttl()))
                .with_modify_settle(self.modify_settle)
                .with_metrics(self.metrics.clone()),
        );

        if self.config.processing.process_existing {
            let scanner = detector.clone();
            let scan_spec = spec.clone();
            let queued = tokio::task::spawn_blocking(move || scanner.scan_existing(&scan_spec))
                .await
                .context("Initial scan task failed")??;
            tracing::info!("Queued {} existing files", queued);
        }

        let processor = FileProcessor::new(
            self.transport.clone(),
            self.config.api.retry_policy(),
            self.config.post_action(),
        )
        .with_settle_delay(self.dispatch.settle_delay)
        .with_metrics(self.metrics.clone());

        let dispatcher = Dispatcher::spawn(Arc::new(processor), self.dispatch, receiver);

        let watcher = match FsWatcher::start(&spec.root, spec.recursive, detector) {
            Ok(watcher) => watcher,
            Err(e) => {
                dispatcher.stop(Duration::ZERO).await;
                return Err(e).context("Failed to start filesystem watcher");
            }
        };

        self.running = Some(Running {
            queue,
            watcher,
            dispatcher,
        });

        tracing::info!("{} started successfully", self.config.service.name);
        Ok(())
    }

    /// Stop watching, drain in-flight uploads and log the final metrics.
    ///
    /// # Returns
    /// `None` if the service was not running
    pub async fn stop(&mut self) -> Option<DrainReport> {
        let running = self.running.take()?;
        tracing::info!("Stopping {}", self.config.service.name);

        running.watcher.stop();
        let report = running.dispatcher.stop(self.dispatch.drain_timeout).await;

        let pending = running.queue.depth();
        if pending > 0 {
            tracing::warn!("{} queued files were not processed", pending);
        }

        self.metrics.log_summary();
        tracing::info!("{} stopped", self.config.service.name);
        Some(report)
    }
}
