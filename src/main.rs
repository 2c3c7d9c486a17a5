//! xml-watcher - folder watcher that uploads new files over HTTP.
//!
//! # Execution Flow
//!
//! 1. Parse the command line and resolve the configuration path
//!    (`--config`, then `CONFIG_FILE`, then `config/config.yaml`)
//! 2. Load and validate the YAML configuration, applying environment overrides
//! 3. Initialize logging (console + optional rotating file)
//! 4. Build the tokio runtime and the HTTP client, run the connectivity check
//! 5. Start the watcher service and report queue depth periodically
//! 6. On Ctrl+C or SIGTERM, stop the service and drain in-flight uploads

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use std::sync::Arc;
use xml_watcher::{
    APP_NAME, ConfigManager, HttpUploader, ServiceConfig, UploadTransport, VERSION, WatcherService,
};

#[derive(Parser, Debug)]
#[command(name = "xml-watcher", version, about = "Watch a folder and upload new files to an API")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,
}

fn main() {
    let args = Args::parse();

    let manager = ConfigManager::resolve(args.config.as_deref());
    let config = match manager.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = match xml_watcher::logging::setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!("Loaded configuration from {}", manager.config_path());

    if let Err(e) = run_service(config) {
        tracing::error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_service(config: ServiceConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("xml-watcher-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(config))?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn run(config: ServiceConfig) -> Result<()> {
    let uploader = HttpUploader::new(&config.api, &config.service.name)
        .context("Failed to initialize API client")?;

    if uploader.test_connection().await {
        tracing::info!("API endpoint is reachable: {}", uploader.endpoint());
    } else {
        tracing::warn!(
            "API connection test failed for {}, continuing anyway",
            uploader.endpoint()
        );
    }

    let report_interval = config.queue_report_interval();
    let transport: Arc<dyn UploadTransport> = Arc::new(uploader);
    let mut service = WatcherService::new(config, transport);
    service.start().await?;

    let metrics = service.metrics();
    let mut ticker = tokio::time::interval(report_interval);
    // First tick completes immediately
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let depth = service.queue_depth();
                if depth > 0 {
                    tracing::info!("Files in queue: {}", depth);
                }
                metrics.log_periodic(depth);
            }
        }
    }

    if let Some(report) = service.stop().await {
        if report.abandoned > 0 {
            tracing::warn!("{} uploads were still running at exit", report.abandoned);
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::warn!("Cannot install SIGTERM handler: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received interrupt, shutting down"),
        Err(e) => {
            // Without a signal handler the service can only be killed
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
