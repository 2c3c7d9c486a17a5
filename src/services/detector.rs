//! Detector: turns filesystem notifications and the startup scan into a
//! deduplicated stream of candidate paths.
//!
//! A path is enqueued when:
//! - it is not a directory
//! - its base name matches at least one configured glob (case-sensitive)
//! - it is not already in the dedup set
//!
//! The dedup set is a coarse safety valve rather than a sliding window. Entries
//! live until the set grows past [`DEDUP_MAX_ENTRIES`], at which point it is
//! cleared wholesale. An optional TTL lets entries expire earlier.
//!
//! # Initial scan
//!
//! [`Detector::scan_existing`] walks the watch root and enqueues every matching
//! file, oldest modification time first. It runs before the notification
//! watcher is armed and does not record paths in the dedup set, so a later
//! notification for a scanned file may queue it a second time.

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::queue::FileQueue;
use super::watcher::FileEventSink;
use crate::metrics::Metrics;
use crate::models::WatchSpec;

/// The dedup set is cleared once it holds more than this many paths
pub const DEDUP_MAX_ENTRIES: usize = 1000;

/// Wait applied to modify notifications before they are considered
pub const MODIFY_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("At least one file pattern is required")]
    NoPatterns,

    #[error("Invalid file pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Watch root is not a directory: {0}")]
    RootNotDirectory(Utf8PathBuf),
}

/// Source of "now" for the dedup set
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Compiled file name globs
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DetectorError> {
        if patterns.is_empty() {
            return Err(DetectorError::NoPatterns);
        }

        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|source| DetectorError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Check a bare file name against every pattern
    pub fn matches_name(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(file_name))
    }

    /// Check the base name of a path
    pub fn matches(&self, path: &Utf8Path) -> bool {
        path.file_name().is_some_and(|name| self.matches_name(name))
    }
}

/// Recently seen paths, keyed to the instant they were first accepted.
///
/// Mutated only from the notification thread in production, but guarded by a
/// mutex so the scan thread and tests can share it safely.
pub struct DedupSet {
    entries: Mutex<HashMap<Utf8PathBuf, Instant>>,
    max_entries: usize,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl DedupSet {
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self::with_clock(max_entries, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(max_entries: usize, ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            ttl,
            clock,
        }
    }

    /// Record `path` if it has not been seen.
    ///
    /// # Returns
    /// `true` when the path is new (and is now recorded), `false` for a duplicate
    pub fn insert(&self, path: &Utf8Path) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(ttl) = self.ttl {
            entries.retain(|_, first_seen| now.saturating_duration_since(*first_seen) < ttl);
        }

        if entries.contains_key(path) {
            return false;
        }

        entries.insert(path.to_path_buf(), now);

        if entries.len() > self.max_entries {
            debug!(
                "Dedup set exceeded {} entries, clearing",
                self.max_entries
            );
            entries.clear();
        }

        true
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(DEDUP_MAX_ENTRIES, None)
    }
}

impl std::fmt::Debug for DedupSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupSet")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Filters notifications and feeds accepted paths into the work queue
#[derive(Debug)]
pub struct Detector {
    patterns: PatternSet,
    dedup: DedupSet,
    queue: FileQueue,
    modify_settle: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl Detector {
    pub fn new(spec: &WatchSpec, queue: FileQueue) -> Result<Self, DetectorError> {
        Ok(Self {
            patterns: PatternSet::new(&spec.patterns)?,
            dedup: DedupSet::default(),
            queue,
            modify_settle: MODIFY_SETTLE_DELAY,
            metrics: None,
        })
    }

    pub fn with_dedup(mut self, dedup: DedupSet) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_modify_settle(mut self, settle: Duration) -> Self {
        self.modify_settle = settle;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    /// Offer a path to the pipeline.
    ///
    /// # Returns
    /// `true` if the path was enqueued
    pub fn accept(&self, path: &Path, is_directory: bool) -> bool {
        if is_directory {
            return false;
        }

        let Some(path) = Utf8Path::from_path(path) else {
            warn!("Ignoring non UTF-8 path: {}", path.display());
            return false;
        };

        if !self.patterns.matches(path) {
            return false;
        }

        if !self.dedup.insert(path) {
            return false;
        }

        self.enqueue(path.to_path_buf())
    }

    /// Handle a create notification
    pub fn on_create(&self, path: &Path, is_directory: bool) -> bool {
        self.accept(path, is_directory)
    }

    /// Handle a modify notification, after the settle delay.
    ///
    /// Blocks the calling (notification) thread for the settle delay.
    pub fn on_modify(&self, path: &Path, is_directory: bool) -> bool {
        if is_directory {
            return false;
        }
        if !self.modify_settle.is_zero() {
            std::thread::sleep(self.modify_settle);
        }
        self.accept(path, is_directory)
    }

    /// Enqueue every pre-existing matching file under the watch root, oldest first.
    ///
    /// # Returns
    /// The number of files enqueued
    pub fn scan_existing(&self, spec: &WatchSpec) -> Result<usize, DetectorError> {
        info!("Processing existing files in {}", spec.root);

        let files = collect_existing(spec, &self.patterns)?;
        info!("Found {} existing files", files.len());

        let mut queued = 0;
        for path in files {
            if self.enqueue(path) {
                queued += 1;
            }
        }

        Ok(queued)
    }

    fn enqueue(&self, path: Utf8PathBuf) -> bool {
        debug!("Detected file: {}", path);
        match self.queue.enqueue(path) {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_detected();
                }
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

impl FileEventSink for Detector {
    fn on_create(&self, path: &Path, is_directory: bool) {
        Detector::on_create(self, path, is_directory);
    }

    fn on_modify(&self, path: &Path, is_directory: bool) {
        Detector::on_modify(self, path, is_directory);
    }
}

/// List matching files under the watch root, sorted by modification time.
///
/// Only the base name is matched against the patterns. Ties on modification
/// time are broken by path so the order is deterministic. Entries that cannot
/// be read (or vanish mid-walk) are skipped with a warning.
pub fn collect_existing(
    spec: &WatchSpec,
    patterns: &PatternSet,
) -> Result<Vec<Utf8PathBuf>, DetectorError> {
    if !spec.root.is_dir() {
        return Err(DetectorError::RootNotDirectory(spec.root.clone()));
    }

    let max_depth = if spec.recursive { usize::MAX } else { 1 };
    let mut found: HashMap<Utf8PathBuf, SystemTime> = HashMap::new();

    for entry in WalkDir::new(&spec.root).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during scan: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(path) = Utf8Path::from_path(entry.path()) else {
            warn!("Skipping non UTF-8 path: {}", entry.path().display());
            continue;
        };

        if !patterns.matches(path) {
            continue;
        }

        match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => {
                found.insert(path.to_path_buf(), modified);
            }
            Ok(Err(e)) => warn!("Cannot read modification time of {}: {}", path, e),
            Err(e) => warn!("Cannot stat {}: {}", path, e),
        }
    }

    let mut files: Vec<(Utf8PathBuf, SystemTime)> = found.into_iter().collect();
    files.sort_by(|(a_path, a_time), (b_path, b_time)| {
        a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
    });

    Ok(files.into_iter().map(|(path, _)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::file_queue;
    use std::sync::Mutex as StdMutex;

    /// Clock that only moves when told to
    struct ManualClock {
        now: StdMutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: StdMutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn spec(patterns: &[&str]) -> WatchSpec {
        WatchSpec {
            root: Utf8PathBuf::from("/watch"),
            recursive: true,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_pattern_set_matches_base_name() {
        let patterns = PatternSet::new(&["*.xml", "*.XML"]).unwrap();

        assert!(patterns.matches(Utf8Path::new("/watch/invoice.xml")));
        assert!(patterns.matches(Utf8Path::new("/watch/deep/ORDER.XML")));
        assert!(!patterns.matches(Utf8Path::new("/watch/notes.txt")));
        assert!(!patterns.matches(Utf8Path::new("/watch/xml/readme")));
    }

    #[test]
    fn test_pattern_set_is_case_sensitive() {
        let patterns = PatternSet::new(&["*.xml"]).unwrap();
        assert!(!patterns.matches(Utf8Path::new("/watch/INVOICE.XML")));
        assert!(!patterns.matches(Utf8Path::new("/watch/invoice.Xml")));
    }

    #[test]
    fn test_pattern_set_rejects_empty_and_invalid() {
        let empty: [&str; 0] = [];
        assert!(matches!(PatternSet::new(&empty), Err(DetectorError::NoPatterns)));
        assert!(matches!(
            PatternSet::new(&["[oops"]),
            Err(DetectorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_dedup_rejects_repeat() {
        let dedup = DedupSet::default();
        let path = Utf8Path::new("/watch/a.xml");

        assert!(dedup.insert(path));
        assert!(!dedup.insert(path));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_dedup_clears_past_max_entries() {
        let dedup = DedupSet::new(3, None);

        for name in ["a", "b", "c"] {
            assert!(dedup.insert(Utf8Path::new(&format!("/watch/{}.xml", name))));
        }
        assert_eq!(dedup.len(), 3);

        // Fourth distinct path pushes the set over the limit
        assert!(dedup.insert(Utf8Path::new("/watch/d.xml")));
        assert!(dedup.is_empty());

        assert!(dedup.insert(Utf8Path::new("/watch/a.xml")));
    }

    #[test]
    fn test_detector_accepts_repeat_after_dedup_reset() {
        let (queue, mut receiver) = file_queue();
        let detector = Detector::new(&spec(&["*.xml"]), queue).unwrap();
        let first = Path::new("/watch/f0.xml");

        for i in 0..DEDUP_MAX_ENTRIES {
            let path = format!("/watch/f{}.xml", i);
            assert!(detector.accept(Path::new(&path), false));
        }
        assert_eq!(detector.dedup().len(), DEDUP_MAX_ENTRIES);
        assert!(!detector.accept(first, false));

        // One more distinct path overflows the set and clears it
        let overflow = format!("/watch/f{}.xml", DEDUP_MAX_ENTRIES);
        assert!(detector.accept(Path::new(&overflow), false));
        assert!(detector.dedup().is_empty());

        assert!(detector.accept(first, false));

        let mut queued = Vec::new();
        while let Some(path) = receiver.try_recv() {
            queued.push(path);
        }
        assert_eq!(queued.len(), DEDUP_MAX_ENTRIES + 2);
        assert_eq!(queued.last().map(|p| p.as_str()), Some("/watch/f0.xml"));
    }

    #[test]
    fn test_dedup_ttl_expiry() {
        let clock = Arc::new(ManualClock::new());
        let dedup = DedupSet::with_clock(100, Some(Duration::from_secs(60)), clock.clone());
        let path = Utf8Path::new("/watch/a.xml");

        assert!(dedup.insert(path));
        clock.advance(Duration::from_secs(30));
        assert!(!dedup.insert(path));

        clock.advance(Duration::from_secs(31));
        assert!(dedup.insert(path));
    }

    #[test]
    fn test_dedup_without_ttl_never_expires() {
        let clock = Arc::new(ManualClock::new());
        let dedup = DedupSet::with_clock(100, None, clock.clone());
        let path = Utf8Path::new("/watch/a.xml");

        assert!(dedup.insert(path));
        clock.advance(Duration::from_secs(86_400));
        assert!(!dedup.insert(path));
    }

    #[test]
    fn test_accept_filters_and_enqueues() {
        let (queue, mut receiver) = file_queue();
        let detector = Detector::new(&spec(&["*.xml"]), queue).unwrap();

        assert!(detector.accept(Path::new("/watch/a.xml"), false));
        assert!(!detector.accept(Path::new("/watch/a.xml"), false));
        assert!(!detector.accept(Path::new("/watch/b.txt"), false));
        assert!(!detector.accept(Path::new("/watch/dir.xml"), true));

        assert_eq!(receiver.try_recv(), Some(Utf8PathBuf::from("/watch/a.xml")));
        assert_eq!(receiver.try_recv(), None);
    }

    #[test]
    fn test_directory_does_not_enter_dedup_set() {
        let (queue, _receiver) = file_queue();
        let detector = Detector::new(&spec(&["*.xml"]), queue).unwrap();

        detector.accept(Path::new("/watch/folder.xml"), true);
        assert!(!detector.dedup().contains(Utf8Path::new("/watch/folder.xml")));
    }

    #[test]
    fn test_on_modify_waits_for_settle_delay() {
        let (queue, mut receiver) = file_queue();
        let detector = Detector::new(&spec(&["*.xml"]), queue)
            .unwrap()
            .with_modify_settle(Duration::from_millis(20));

        let started = Instant::now();
        assert!(detector.on_modify(Path::new("/watch/a.xml"), false));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(receiver.try_recv().is_some());
    }

    #[test]
    fn test_metrics_count_detected_files() {
        let (queue, _receiver) = file_queue();
        let metrics = Arc::new(Metrics::new());
        let detector = Detector::new(&spec(&["*.xml"]), queue)
            .unwrap()
            .with_metrics(metrics.clone());

        detector.accept(Path::new("/watch/a.xml"), false);
        detector.accept(Path::new("/watch/a.xml"), false);
        detector.accept(Path::new("/watch/b.xml"), false);

        assert_eq!(
            metrics
                .files_detected
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }
}
