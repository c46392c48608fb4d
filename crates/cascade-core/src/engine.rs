//! The engine facade.
//!
//! [`Engine`] owns an [`EngineState`] and a [`TelemetrySink`]. Callers queue
//! stimuli, reinforcement, and link requests between ticks, run ticks, and
//! read back the workspace and the criticality state. Queued inputs are
//! merged at the start of the next tick.

use std::collections::BTreeMap;

use cascade_dynamics::{DynamicsConfig, ParameterError};
use cascade_graph::GraphSnapshot;
use cascade_types::{
    CriticalityState, EmergentEntity, EntityId, GlobalState, LinkRequest, NodeId,
    ReinforcementSignal, Stimulus, TelemetryRecord, WorkspaceItem, WorkspaceSelection,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::telemetry::{NoOpSink, TelemetrySink};
use crate::tick::{self, EngineState, TickError, TickResult};

/// One external input for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineInput {
    /// Energy to inject.
    Stimulus(Stimulus),
    /// A learning annotation.
    Reinforcement(ReinforcementSignal),
    /// A link to create.
    Link(LinkRequest),
}

/// A running engine instance over one graph.
pub struct Engine {
    state: EngineState,
    sink: Box<dyn TelemetrySink>,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine over `graph` that discards telemetry.
    ///
    /// # Errors
    ///
    /// Returns a [`ParameterError`] if `config` fails validation.
    pub fn new(graph: GraphSnapshot, config: DynamicsConfig) -> Result<Self, ParameterError> {
        config.validate()?;
        Ok(Self {
            state: EngineState::new(graph, config),
            sink: Box::new(NoOpSink),
        })
    }

    /// Replace the telemetry sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Run one tick of the configured reference interval and return the
    /// selected workspace.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the tick counter would overflow.
    pub fn tick(&mut self) -> Result<WorkspaceSelection, TickError> {
        let dt = self.state.config.diffusion.dt_ref;
        self.tick_with_dt(dt).map(|result| result.selection)
    }

    /// Run one tick of `dt` seconds and return everything it produced.
    ///
    /// Telemetry is emitted to the sink before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the tick counter would overflow.
    pub fn tick_with_dt(&mut self, dt: f64) -> Result<TickResult, TickError> {
        let result = tick::run_tick(&mut self.state, dt)?;
        for event in &result.events {
            self.sink.emit(&TelemetryRecord::now(event.clone()));
        }
        Ok(result)
    }

    /// Queue a stimulus for the next tick.
    pub fn inject_stimulus(
        &mut self,
        energy_budget: f64,
        entry_nodes: Vec<NodeId>,
        entity_mix: BTreeMap<EntityId, f64>,
    ) {
        self.submit(EngineInput::Stimulus(Stimulus {
            energy_budget,
            entry_nodes,
            entity_mix,
        }));
    }

    /// Queue a reinforcement signal for the next tick.
    pub fn reinforce(&mut self, signal: ReinforcementSignal) {
        self.submit(EngineInput::Reinforcement(signal));
    }

    /// Queue a link-creation request for the next tick.
    pub fn request_link(&mut self, request: LinkRequest) {
        self.submit(EngineInput::Link(request));
    }

    /// Queue any external input for the next tick.
    pub fn submit(&mut self, input: EngineInput) {
        let pending = &mut self.state.pending;
        match input {
            EngineInput::Stimulus(stimulus) => {
                debug!(
                    energy_budget = stimulus.energy_budget,
                    entry_nodes = stimulus.entry_nodes.len(),
                    "Stimulus queued"
                );
                pending.stimuli.push(stimulus);
            }
            EngineInput::Reinforcement(signal) => pending.reinforcement.push(signal),
            EngineInput::Link(request) => pending.link_requests.push(request),
        }
    }

    /// Whether any input is waiting for the next tick.
    pub fn has_pending_input(&self) -> bool {
        !self.state.pending.is_empty()
    }

    /// The latest workspace as an ordered `(item, score)` list.
    pub fn get_workspace(&self) -> Vec<(WorkspaceItem, f64)> {
        self.state.workspace.ranked()
    }

    /// The latest full workspace selection.
    pub const fn workspace(&self) -> &WorkspaceSelection {
        &self.state.workspace
    }

    /// The latest spectral-radius estimates and diagnostics.
    pub const fn get_criticality_state(&self) -> &CriticalityState {
        &self.state.global.criticality
    }

    /// The global state as of the last tick.
    pub const fn global_state(&self) -> &GlobalState {
        &self.state.global
    }

    /// Live entities by id.
    pub const fn entities(&self) -> &BTreeMap<EntityId, EmergentEntity> {
        self.state.entities().entities()
    }

    /// The working graph.
    pub const fn graph(&self) -> &GraphSnapshot {
        &self.state.graph
    }

    /// The full engine state.
    pub const fn state(&self) -> &EngineState {
        &self.state
    }

    /// Simulated seconds since the last delivered stimulus, if any.
    pub fn since_stimulus(&self) -> Option<f64> {
        self.state.clock.since_stimulus()
    }

    /// Merge a fresh store snapshot, keeping engine-owned state.
    pub fn refresh(&mut self, fresh: GraphSnapshot) {
        self.state.graph.merge_refresh(fresh);
        debug!(
            nodes = self.state.graph.node_count(),
            links = self.state.graph.link_count(),
            "Snapshot refreshed"
        );
    }
}
