use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8PathBuf;
use std::time::Duration;

/// Settle delay applied by a worker before reading a dequeued file.
pub const UPLOAD_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// What to watch: a root directory, whether to descend into it, and the
/// file name globs that select candidate files.
///
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub root: Utf8PathBuf,
    pub recursive: bool,
    pub patterns: Vec<String>,
}

/// Disposal applied to a file after a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PostAction {
    #[default]
    None,
    Delete,
    MoveTo(Utf8PathBuf),
}

/// Credentials attached to every upload request
#[derive(Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl AuthMode {
    /// Value for the `Authorization` header, if any
    pub fn header_value(&self) -> Option<String> {
        match self {
            AuthMode::None => None,
            AuthMode::Bearer(token) => Some(format!("Bearer {}", token)),
            AuthMode::Basic { username, password } => {
                let credentials = STANDARD.encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", credentials))
            }
        }
    }
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::None => write!(f, "None"),
            AuthMode::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            AuthMode::Basic { username, .. } => write!(f, "Basic({}, <redacted>)", username),
        }
    }
}

/// Attempt budget for a single file.
///
/// The delay between attempts is fixed. Every failure class consumes one
/// attempt, including authentication and not-found responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Tuning for the dispatcher's coordinating loop and worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Maximum uploads in flight at once
    pub max_concurrent: usize,

    /// How long a single dequeue waits before re-checking the stop flag
    pub poll_interval: Duration,

    /// How long `stop` waits for in-flight uploads
    pub drain_timeout: Duration,

    /// Wait between the existence check and reading the file
    pub settle_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            settle_delay: UPLOAD_SETTLE_DELAY,
        }
    }
}
