// xml-watcher - watch a folder and upload matching files to an HTTP endpoint
//
// This is the library crate containing the pipeline and configuration types.
// The binary crate (main.rs) provides the service entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::{ConfigError, ConfigManager};
pub use metrics::Metrics;
pub use models::ServiceConfig;
pub use services::{HttpUploader, UploadTransport, WatcherService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
