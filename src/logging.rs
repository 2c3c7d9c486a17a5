use crate::models::LoggingConfig;
use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Translate a configured level name into an `EnvFilter` directive.
///
/// Accepts the level names used in the YAML configuration (`DEBUG`, `INFO`,
/// `WARNING`, `ERROR`, `CRITICAL`) case-insensitively, plus `trace` and `warn`.
pub fn filter_directive(level: &str) -> Result<&'static str> {
    let directive = match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        other => bail!("Unknown log level: {}", other),
    };
    Ok(directive)
}

/// Setup logging with console output and an optional rotating log file.
///
/// The console layer is always installed; colours follow `colored_output`.
/// When `file` is set, logs are also written to that file with daily rotation,
/// keeping at most `backup_count` files.
///
/// # Arguments
/// * `config` - The `logging` section of the service configuration
///
/// # Returns
/// A guard that must be held for the duration of the program to keep file logging
/// active, or `None` when no log file is configured
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::new(filter_directive(&config.level)?);

    let (file_writer, guard) = match log_file_appender(config)? {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(non_blocking), Some(guard))
        }
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false) // No ANSI codes in log files
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.colored_output)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        "Logging initialized: level={}, file={}, colored={}",
        config.level,
        if config.file.is_empty() { "<none>" } else { config.file.as_str() },
        config.colored_output
    );
    if let Some(notice) = size_rotation_notice(config) {
        tracing::warn!("{}", notice);
    }

    Ok(guard)
}

/// Warning text for a configured `max_size`, which daily rotation cannot honour.
fn size_rotation_notice(config: &LoggingConfig) -> Option<String> {
    let max_size = config.max_size?;
    if config.file.trim().is_empty() {
        return None;
    }
    Some(format!(
        "logging.max_size={} MB is ignored: log files rotate daily, keeping {} files",
        max_size,
        config.backup_count.max(1)
    ))
}

/// Build the rolling file appender described by the config, creating the log directory.
fn log_file_appender(config: &LoggingConfig) -> Result<Option<RollingFileAppender>> {
    let file = config.file.trim();
    if file.is_empty() {
        return Ok(None);
    }

    let log_path = Utf8Path::new(file);
    let log_dir = match log_path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = log_path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", file))?;

    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(config.backup_count.max(1))
        .build(log_dir)
        .with_context(|| format!("Failed to create log file appender in {}", log_dir))?;

    Ok(Some(appender))
}
