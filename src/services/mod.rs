//! Services module - the detect, queue and upload pipeline.
//!
//! # Components
//!
//! - [`FsWatcher`]: `notify` subscription on the watch root. Translates raw
//!   events into create/modify calls on a [`FileEventSink`].
//! - [`Detector`]: the production sink. Filters directories, matches base names
//!   against the configured globs, deduplicates via [`DedupSet`] and enqueues.
//!   Also performs the oldest-first initial scan.
//! - [`FileQueue`] / [`QueueReceiver`]: unbounded FIFO with a depth counter.
//! - [`Dispatcher`]: coordinating loop that bounds concurrency with a
//!   semaphore and hands each path to a [`FileProcessor`].
//! - [`UploadTransport`]: seam for the HTTP round trip. [`HttpUploader`] is
//!   the reqwest implementation; tests substitute their own.
//! - [`apply_post_action`]: delete or move a file after a successful upload.
//! - [`WatcherService`]: owns all of the above and enforces start-up and
//!   shutdown ordering.
//!
//! # Data flow
//!
//! ```text
//! notify thread ──► Detector ──► FileQueue ──► Dispatcher ──► FileProcessor
//!                      ▲                                       │
//!     initial scan ────┘                          upload + retry, post action
//! ```

pub mod detector;
pub mod dispatcher;
pub mod post_process;
pub mod queue;
pub mod service;
pub mod upload;
pub mod watcher;

pub use detector::{
    Clock, DEDUP_MAX_ENTRIES, DedupSet, Detector, DetectorError, MODIFY_SETTLE_DELAY, PatternSet,
    SystemClock, collect_existing,
};
pub use dispatcher::{Dispatcher, DispatcherHandle, DrainReport, FileProcessor, TaskOutcome};
pub use post_process::{PostOutcome, apply_post_action, unique_destination};
pub use queue::{Dequeue, FileQueue, QueueClosed, QueueReceiver, file_queue};
pub use service::WatcherService;
pub use upload::{
    FileError, FilePayload, HttpUploader, ResponseBody, UploadError, UploadFailure, UploadReport,
    UploadResponse, UploadTask, UploadTransport, XML_MIME_TYPE, upload_with_retry,
};
pub use watcher::{FileEventSink, FsWatcher, WatcherError, dispatch_event};
