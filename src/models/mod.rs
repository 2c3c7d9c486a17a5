//! Data models for the XML watcher service.
//!
//! - [`ServiceConfig`]: The YAML configuration tree (watch folder, API, processing, logging, service)
//! - [`WatchSpec`]: Root directory, recursion flag and file name patterns for one run
//! - [`PostAction`]: What happens to a file after it uploads successfully
//! - [`AuthMode`]: Credentials attached to upload requests
//! - [`RetryPolicy`] and [`DispatchSettings`]: Attempt budget and worker pool tuning
//!
//! The derived types are plain values computed once from [`ServiceConfig`] at
//! startup and never mutated afterwards.

pub mod config;
pub mod pipeline;

pub use config::{
    ApiConfig, AuthConfig, AuthKind, LoggingConfig, ProcessingConfig, ServiceConfig,
    ServiceSettings,
};
pub use pipeline::{
    AuthMode, DispatchSettings, PostAction, RetryPolicy, UPLOAD_SETTLE_DELAY, WatchSpec,
};
