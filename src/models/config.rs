use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::pipeline::{AuthMode, DispatchSettings, PostAction, RetryPolicy, WatchSpec};

/// Service configuration loaded from `config/config.yaml` (or the file named by `CONFIG_FILE`).
///
/// Every section falls back to its defaults when omitted. Required values
/// (`watch_folder`, `api.endpoint`) default to empty strings and are rejected by
/// [`crate::config::validate`] rather than by the deserializer, so the user gets a
/// "field missing" message instead of a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub watch_folder: String,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub service: ServiceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub endpoint: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_api_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    None,
    Bearer,
    Basic,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type", default)]
    pub kind: AuthKind,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("kind", &self.kind)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub process_existing: bool,

    #[serde(default)]
    pub delete_after_upload: bool,

    /// Empty string means "leave uploaded files where they are"
    #[serde(default)]
    pub processed_folder: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            process_existing: false,
            delete_after_upload: false,
            processed_folder: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path; empty disables file output
    #[serde(default)]
    pub file: String,

    #[serde(default = "default_backup_count")]
    pub backup_count: usize,

    /// Size limit in MB from older configurations. Accepted but not enforced:
    /// the log file rotates daily, never by size.
    #[serde(default)]
    pub max_size: Option<u64>,

    #[serde(default = "default_true")]
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            backup_count: default_backup_count(),
            max_size: None,
            colored_output: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Dispatcher dequeue poll timeout in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,

    #[serde(default = "default_true")]
    pub recursive: bool,

    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Seconds between queue-depth reports
    #[serde(default = "default_queue_report_interval")]
    pub queue_report_interval: u64,

    /// Seconds to wait for in-flight uploads on shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: u64,

    /// Seconds a dedup entry suppresses repeat notifications; 0 keeps entries until the size reset
    #[serde(default)]
    pub dedup_ttl: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            check_interval: default_check_interval(),
            recursive: true,
            max_concurrent_uploads: default_max_concurrent_uploads(),
            queue_report_interval: default_queue_report_interval(),
            drain_timeout: default_drain_timeout(),
            dedup_ttl: 0,
        }
    }
}

fn default_api_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_patterns() -> Vec<String> {
    vec!["*.xml".to_string(), "*.XML".to_string()]
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_backup_count() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "xml-watcher".to_string()
}

fn default_check_interval() -> f64 {
    1.0
}

fn default_max_concurrent_uploads() -> usize {
    5
}

fn default_queue_report_interval() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    30
}

impl ProcessingConfig {
    /// The processed folder, if one is configured
    pub fn processed_folder(&self) -> Option<Utf8PathBuf> {
        let folder = self.processed_folder.trim();
        if folder.is_empty() {
            None
        } else {
            Some(Utf8PathBuf::from(folder))
        }
    }

    /// Post-upload disposal. Delete takes precedence over moving.
    pub fn post_action(&self) -> PostAction {
        if self.delete_after_upload {
            PostAction::Delete
        } else if let Some(folder) = self.processed_folder() {
            PostAction::MoveTo(folder)
        } else {
            PostAction::None
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_secs(self.retry_delay))
    }

    /// Resolve the configured credentials.
    ///
    /// Incomplete credentials resolve to [`AuthMode::None`]; [`crate::config::validate`]
    /// rejects them before the service starts.
    pub fn auth_mode(&self) -> AuthMode {
        match self.auth.kind {
            AuthKind::None => AuthMode::None,
            AuthKind::Bearer => match self.auth.token.as_deref() {
                Some(token) if !token.is_empty() => AuthMode::Bearer(token.to_string()),
                _ => AuthMode::None,
            },
            AuthKind::Basic => match (self.auth.username.as_deref(), self.auth.password.as_deref()) {
                (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                    AuthMode::Basic {
                        username: username.to_string(),
                        password: password.to_string(),
                    }
                }
                _ => AuthMode::None,
            },
        }
    }
}

impl ServiceConfig {
    pub fn watch_spec(&self) -> WatchSpec {
        WatchSpec {
            root: Utf8PathBuf::from(&self.watch_folder),
            recursive: self.service.recursive,
            patterns: self.processing.patterns.clone(),
        }
    }

    pub fn post_action(&self) -> PostAction {
        self.processing.post_action()
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_concurrent: self.service.max_concurrent_uploads.max(1),
            poll_interval: Duration::from_secs_f64(self.service.check_interval.max(0.01)),
            drain_timeout: Duration::from_secs(self.service.drain_timeout),
            ..DispatchSettings::default()
        }
    }

    pub fn dedup_ttl(&self) -> Option<Duration> {
        (self.service.dedup_ttl > 0).then(|| Duration::from_secs(self.service.dedup_ttl))
    }

    pub fn queue_report_interval(&self) -> Duration {
        Duration::from_secs(self.service.queue_report_interval.max(1))
    }
}
