//! Engine loop runner.
//!
//! This module provides [`run_engine`], the top-level async function that
//! drives the tick loop with support for:
//!
//! - **Adaptive scheduling**: the wait before a maintenance tick comes from
//!   the [`TickScheduler`] and grows with the time since the last stimulus
//! - **Preemption**: an arriving input cancels the pending wait and is
//!   merged by a tick that runs immediately
//! - **Non-blocking store access**: write-backs and completion requests are
//!   spawned fire-and-forget; snapshot refreshes load on a spawned task and
//!   arrive through a `watch` channel
//! - **Bounded runs**: stop after `max_ticks`
//! - **Clean shutdown**: a `watch` flag stops the loop between ticks
//!
//! A tick in progress always runs to completion.

use std::sync::Arc;

use cascade_graph::{GraphSnapshot, GraphStore};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineInput};
use crate::scheduler::TickScheduler;
use crate::tick::{TickError, TickResult};

/// Errors that can occur during the engine run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick execution failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEndReason {
    /// The configured tick limit was reached.
    MaxTicksReached,
    /// Shutdown was requested.
    Shutdown,
}

/// Result of an engine run.
#[derive(Debug)]
pub struct RunSummary {
    /// The reason the run ended.
    pub end_reason: RunEndReason,
    /// The last tick result, if any tick completed.
    pub final_result: Option<TickResult>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
}

/// Loop bounds and refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop after this many ticks (0 = unlimited).
    pub max_ticks: u64,
    /// Reload the snapshot every N ticks (0 = never).
    pub refresh_interval_ticks: u64,
}

impl RunOptions {
    /// Take the options from the engine configuration.
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_ticks: config.scheduler.max_ticks,
            refresh_interval_ticks: config.store.refresh_interval_ticks,
        }
    }
}

/// Callback invoked after each tick completes.
///
/// Implementations can use this to publish the workspace, collect tick
/// results, and so on.
pub trait TickCallback: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, result: &TickResult, engine: &Engine);
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _result: &TickResult, _engine: &Engine) {}
}

/// Channels connecting the loop to the outside world.
#[derive(Debug)]
pub struct RunChannels {
    /// External inputs; closing the sender leaves the loop on its
    /// maintenance schedule.
    pub inputs: mpsc::Receiver<EngineInput>,
    /// Set to `true` to stop the loop between ticks.
    pub shutdown: watch::Receiver<bool>,
}

/// Run the engine loop until a termination condition is met.
///
/// # Arguments
///
/// * `engine` - The engine instance
/// * `store` - Backing graph store
/// * `scheduler` - Maintenance tick scheduling
/// * `options` - Tick limit and refresh cadence
/// * `channels` - Input queue and shutdown flag
/// * `callback` - Called after each tick
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick execution fails unrecoverably.
pub async fn run_engine<S: GraphStore + 'static>(
    engine: &mut Engine,
    store: Arc<S>,
    scheduler: &TickScheduler,
    options: RunOptions,
    channels: &mut RunChannels,
    callback: &mut dyn TickCallback,
) -> Result<RunSummary, RunnerError> {
    let mut last_result: Option<TickResult> = None;
    let mut total_ticks: u64 = 0;
    let mut inputs_open = true;
    let mut shutdown_open = true;
    let mut last_tick = Instant::now();
    let (refresh_tx, mut refresh_rx) = watch::channel::<Option<GraphSnapshot>>(None);
    let refresh_tx = Arc::new(refresh_tx);

    info!(
        max_ticks = options.max_ticks,
        refresh_interval_ticks = options.refresh_interval_ticks,
        nodes = engine.graph().node_count(),
        links = engine.graph().link_count(),
        "Engine loop starting"
    );

    loop {
        // --- Check stop request (before waiting) ---
        if *channels.shutdown.borrow() {
            info!("Shutdown requested");
            return Ok(RunSummary {
                end_reason: RunEndReason::Shutdown,
                final_result: last_result,
                total_ticks,
            });
        }

        // --- Wait for input or the next maintenance tick ---
        if !engine.has_pending_input() {
            let since = engine
                .since_stimulus()
                .unwrap_or(engine.global_state().sim_time);
            let wait = scheduler.next_interval(since);
            tokio::select! {
                biased;
                changed = channels.shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        debug!("Shutdown channel closed");
                        shutdown_open = false;
                    }
                    continue;
                }
                input = channels.inputs.recv(), if inputs_open => {
                    match input {
                        Some(input) => {
                            engine.submit(input);
                            while let Ok(more) = channels.inputs.try_recv() {
                                engine.submit(more);
                            }
                        }
                        None => {
                            debug!("Input channel closed");
                            inputs_open = false;
                            continue;
                        }
                    }
                }
                () = tokio::time::sleep(wait) => {}
            }
        }

        // --- Merge a refreshed snapshot, if one arrived ---
        if refresh_rx.has_changed().unwrap_or(false) {
            let fresh = refresh_rx.borrow_and_update().clone();
            if let Some(fresh) = fresh {
                engine.refresh(fresh);
            }
        }

        // --- Execute tick ---
        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;
        let result = engine.tick_with_dt(dt)?;
        total_ticks = total_ticks.saturating_add(1);

        // --- Publish to the store (fire-and-forget) ---
        publish(&store, &result);
        if options.refresh_interval_ticks > 0
            && result.tick.checked_rem(options.refresh_interval_ticks) == Some(0)
        {
            spawn_refresh(&store, &refresh_tx);
        }

        // --- Notify callback ---
        callback.on_tick(&result, engine);

        // --- Check tick limit (after tick) ---
        if options.max_ticks > 0 && total_ticks >= options.max_ticks {
            info!(
                tick = result.tick,
                max_ticks = options.max_ticks,
                "Tick limit reached"
            );
            return Ok(RunSummary {
                end_reason: RunEndReason::MaxTicksReached,
                final_result: Some(result),
                total_ticks,
            });
        }

        last_result = Some(result);
    }
}

/// Spawn the write-back and completion requests for a tick.
fn publish<S: GraphStore + 'static>(store: &Arc<S>, result: &TickResult) {
    if !result.delta.is_empty() {
        let store = Arc::clone(store);
        let delta = result.delta.clone();
        tokio::spawn(async move {
            let tick = delta.tick;
            if let Err(e) = store.write_back(delta).await {
                warn!(tick, error = %e, "Write-back failed");
            }
        });
    }
    for request in &result.completions {
        let store = Arc::clone(store);
        let request = request.clone();
        tokio::spawn(async move {
            let element = request.element.to_string();
            if let Err(e) = store.request_completion(request).await {
                warn!(element = %element, error = %e, "Completion request failed");
            }
        });
    }
}

/// Load a fresh snapshot on a spawned task and hand it to the loop.
fn spawn_refresh<S: GraphStore + 'static>(
    store: &Arc<S>,
    tx: &Arc<watch::Sender<Option<GraphSnapshot>>>,
) {
    let store = Arc::clone(store);
    let tx = Arc::clone(tx);
    tokio::spawn(async move {
        match store.load_snapshot().await {
            Ok(snapshot) => {
                tx.send_replace(Some(snapshot));
            }
            Err(e) => warn!(error = %e, "Snapshot refresh failed"),
        }
    });
}

/// Log the end of a run.
pub fn log_run_end(summary: &RunSummary) {
    info!(
        reason = ?summary.end_reason,
        total_ticks = summary.total_ticks,
        final_tick = summary.final_result.as_ref().map(|r| r.tick),
        "Engine loop ended"
    );

    if let Some(ref result) = summary.final_result {
        info!(
            tick = result.tick,
            workspace = result.selection.entries.len(),
            capacity_used = result.selection.capacity_used,
            "Final tick summary"
        );
    } else {
        warn!("Engine loop ended with no ticks executed");
    }
}
