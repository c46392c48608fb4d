//! Tick callback that reports the workspace.
//!
//! After each tick, this callback logs the selected workspace when it
//! differs from the previous one, plus a periodic heartbeat with the
//! criticality state so a quiet engine still shows signs of life.

use cascade_core::Engine;
use cascade_core::TickResult;
use cascade_core::runner::TickCallback;
use cascade_types::WorkspaceItem;
use tracing::{debug, info};

/// Callback that logs workspace changes and a periodic heartbeat.
pub struct WorkspaceLog {
    last: Vec<WorkspaceItem>,
    heartbeat_ticks: u64,
}

impl WorkspaceLog {
    /// Create a callback that logs a heartbeat every `heartbeat_ticks`
    /// ticks (0 disables the heartbeat).
    pub const fn new(heartbeat_ticks: u64) -> Self {
        Self {
            last: Vec::new(),
            heartbeat_ticks,
        }
    }
}

impl TickCallback for WorkspaceLog {
    fn on_tick(&mut self, result: &TickResult, engine: &Engine) {
        let items: Vec<WorkspaceItem> = result
            .selection
            .entries
            .iter()
            .map(|entry| entry.item.clone())
            .collect();

        if items == self.last {
            debug!(tick = result.tick, "Workspace unchanged");
        } else {
            let listing: Vec<String> = items.iter().map(ToString::to_string).collect();
            info!(
                tick = result.tick,
                items = ?listing,
                capacity_used = result.selection.capacity_used,
                truncated = result.selection.truncated,
                "Workspace changed"
            );
            self.last = items;
        }

        if result.tick.checked_rem(self.heartbeat_ticks) == Some(0) {
            let criticality = engine.get_criticality_state();
            info!(
                tick = result.tick,
                rho = criticality.global_rho,
                safety = ?criticality.safety,
                branching_ratio = criticality.branching_ratio,
                entities = engine.entities().len(),
                total_energy = engine.global_state().total_energy,
                "Engine heartbeat"
            );
        }
    }
}
