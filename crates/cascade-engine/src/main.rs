//! Engine binary for Cascade.
//!
//! This is the main entry point that wires together the graph store, the
//! engine, the scripted input source, and the async tick loop. It loads
//! configuration, initializes all subsystems, and runs until the loop
//! reaches its tick bound or the process receives ctrl-c.
//!
//! # Usage
//!
//! ```text
//! cascade-engine [CONFIG] [INPUT_SCRIPT]
//! ```
//!
//! `CONFIG` defaults to `$CASCADE_CONFIG`, then `cascade-config.yaml`.
//! `INPUT_SCRIPT` defaults to `$CASCADE_INPUT_SCRIPT`; without one the
//! engine runs on its maintenance schedule alone.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (YAML plus environment overrides)
//! 2. Initialize structured logging (tracing)
//! 3. Load the seed graph into the in-memory store
//! 4. Build the engine and its telemetry sink
//! 5. Wire the input and shutdown channels
//! 6. Start the input script, if any
//! 7. Run the engine loop
//! 8. Log the result

mod error;
mod input_script;
mod workspace_log;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cascade_core::config::LoggingConfig;
use cascade_core::{
    Engine, EngineConfig, LogFormat, RunChannels, RunOptions, TickScheduler, TracingSink,
    run_engine, runner,
};
use cascade_graph::{GraphStore as _, MemoryStore};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::workspace_log::WorkspaceLog;

/// Configuration file used when neither an argument nor `CASCADE_CONFIG`
/// names one.
const DEFAULT_CONFIG_PATH: &str = "cascade-config.yaml";

/// Ticks between heartbeat log lines.
const HEARTBEAT_TICKS: u64 = 100;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the engine loop fails.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .or_else(|| std::env::var("CASCADE_CONFIG").ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let script_path = args
        .next()
        .or_else(|| std::env::var("CASCADE_INPUT_SCRIPT").ok())
        .map(PathBuf::from);
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(config = %config_path.display(), "cascade-engine starting");
    info!(
        snapshot_path = %config.store.snapshot_path.display(),
        refresh_interval_ticks = config.store.refresh_interval_ticks,
        min_interval_ms = config.scheduler.min_interval_ms,
        max_ticks = config.scheduler.max_ticks,
        "Configuration loaded"
    );

    // 3. Load the seed graph.
    let store = Arc::new(MemoryStore::from_json_file(&config.store.snapshot_path)?);
    let graph = store.load_snapshot().await?;
    info!(
        nodes = graph.node_count(),
        links = graph.link_count(),
        incomplete = graph.incomplete_elements().len(),
        "Seed graph loaded"
    );

    // 4. Build the engine.
    let engine = Engine::new(graph, config.dynamics.clone())?;
    let mut engine = if config.logging.telemetry_events {
        engine.with_sink(TracingSink)
    } else {
        engine
    };

    // 5. Wire channels.
    let (input_tx, input_rx) = mpsc::channel(config.scheduler.input_queue.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut channels = RunChannels {
        inputs: input_rx,
        shutdown: shutdown_rx,
    };

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    // 6. Start the input script.
    if let Some(path) = script_path {
        let lines = input_script::load_script(&path).await?;
        let tx = input_tx.clone();
        tokio::spawn(async move {
            let sent = input_script::feed(lines, tx).await;
            info!(sent, "Input script finished");
        });
    }
    drop(input_tx);

    // 7. Run the engine loop.
    let scheduler = TickScheduler::new(&config.scheduler);
    let options = RunOptions::from_config(&config);
    let mut callback = WorkspaceLog::new(HEARTBEAT_TICKS);
    let summary = run_engine(
        &mut engine,
        Arc::clone(&store),
        &scheduler,
        options,
        &mut channels,
        &mut callback,
    )
    .await?;

    // 8. Log results.
    runner::log_run_end(&summary);
    info!(
        end_reason = ?summary.end_reason,
        total_ticks = summary.total_ticks,
        store_writes = store.write_count().await,
        "cascade-engine shutdown complete"
    );

    Ok(())
}

/// Load the engine configuration from `path`.
///
/// A missing file is not an error: defaults are used, with environment
/// overrides still applied.
fn load_config(path: &Path) -> Result<EngineConfig, EngineError> {
    if path.exists() {
        Ok(EngineConfig::from_file(path)?)
    } else {
        Ok(EngineConfig::parse("")?)
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}
