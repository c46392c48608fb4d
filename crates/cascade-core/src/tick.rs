//! Tick cycle: the phased loop that drives the Cascade engine.
//!
//! Each tick runs through these phases against the in-memory snapshot:
//!
//! 0. **Clock** -- validate `dt` and advance the clock.
//!
//! 1. **Merge inputs** -- file completion requests for incomplete elements,
//!    apply queued reinforcement, create requested links, and inject queued
//!    stimuli.
//!
//! 2. **Diffusion** -- one stride per energy channel.
//!
//! 3. **Decay** -- state decay, inhibition, saturation, and sanitizing.
//!
//! 4. **Plasticity** -- gated learning on this stride's traversals, slow
//!    weight decay, and probation pruning.
//!
//! 5. **Criticality** -- estimate the spectral radius globally and per
//!    channel, retune the parameters for the next tick, and update the
//!    avalanche statistics.
//!
//! 6. **Emergence** -- detect clusters and update entity identities.
//!
//! 7. **Workspace** -- score and select the workspace.
//!
//! 8. **Commit** -- update the global state and build the write-back delta.
//!
//! The tick never touches the store. It returns everything the caller has to
//! publish: telemetry, anomalies, the delta, and completion requests. Given
//! the same snapshot, inputs, and seed, a tick is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use cascade_dynamics::criticality::{self, branching_ratio};
use cascade_dynamics::{
    AnomalyLog, AvalancheTracker, CriticalityController, DynamicsConfig, EntityTracker,
    LearningContext, LinkBudget, decay, diffusion, plasticity, stimulus, workspace,
};
use cascade_graph::{CompletionRequest, ElementRef, GraphSnapshot, SnapshotDelta};
use cascade_types::{
    Anomaly, CriticalityState, EntityId, GlobalState, LinkId, LinkRequest, NodeId,
    ReinforcementSignal, Stimulus, TelemetryEvent, WorkspaceItem, WorkspaceSelection,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::clock::{ClockError, EngineClock};

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// External inputs queued between ticks and merged at the start of the
/// next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingInputs {
    /// Stimuli in arrival order.
    pub stimuli: Vec<Stimulus>,
    /// Reinforcement signals in arrival order.
    pub reinforcement: Vec<ReinforcementSignal>,
    /// Link-creation requests in arrival order.
    pub link_requests: Vec<LinkRequest>,
}

impl PendingInputs {
    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty() && self.reinforcement.is_empty() && self.link_requests.is_empty()
    }
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone)]
pub struct TickResult {
    /// The tick number that was executed.
    pub tick: u64,
    /// The time step actually applied (zero when the requested one was invalid).
    pub dt: f64,
    /// The workspace chosen on this tick.
    pub selection: WorkspaceSelection,
    /// Telemetry in emission order.
    pub events: Vec<TelemetryEvent>,
    /// Anomalies tolerated during the tick.
    pub anomalies: Vec<Anomaly>,
    /// Engine-owned changes to write back to the store.
    pub delta: SnapshotDelta,
    /// Elements the store should finish loading.
    pub completions: Vec<CompletionRequest>,
}

/// The mutable engine state passed through the tick cycle.
///
/// This bundles everything a tick reads or writes. It holds no I/O handles;
/// the runner owns the store and publishes what each tick returns.
#[derive(Debug)]
pub struct EngineState {
    /// The working graph snapshot.
    pub graph: GraphSnapshot,
    /// The engine clock.
    pub clock: EngineClock,
    /// Global state, updated once per tick.
    pub global: GlobalState,
    /// Mechanism parameters.
    pub config: DynamicsConfig,
    /// Inputs waiting for the next tick.
    pub pending: PendingInputs,
    /// The latest workspace selection.
    pub workspace: WorkspaceSelection,
    controller: CriticalityController,
    entities: EntityTracker,
    avalanches: AvalancheTracker,
    link_budget: LinkBudget,
    /// Nodes selected directly or through an entity on the previous tick.
    previous_workspace: BTreeSet<NodeId>,
    /// Threshold-active node count at the end of the previous tick.
    previous_active: usize,
    /// Incomplete elements a completion request has already been filed for.
    requested: BTreeSet<ElementRef>,
    rng: StdRng,
}

impl EngineState {
    /// Build the state for a graph, starting from the configured parameters.
    pub fn new(graph: GraphSnapshot, config: DynamicsConfig) -> Self {
        let params = config.initial_params();
        let previous_active = active_count(&graph, config.diffusion.default_threshold);
        Self {
            graph,
            clock: EngineClock::new(),
            global: GlobalState::new(params),
            controller: CriticalityController::new(config.criticality.clone(), params),
            entities: EntityTracker::new(config.emergence.clone()),
            avalanches: AvalancheTracker::new(),
            link_budget: LinkBudget::new(),
            rng: StdRng::seed_from_u64(config.criticality.seed),
            pending: PendingInputs::default(),
            workspace: WorkspaceSelection::default(),
            previous_workspace: BTreeSet::new(),
            previous_active,
            requested: BTreeSet::new(),
            config,
        }
    }

    /// Entity tracker, for reading the live entities.
    pub const fn entities(&self) -> &EntityTracker {
        &self.entities
    }

    /// Avalanche statistics gathered so far.
    pub const fn avalanches(&self) -> &AvalancheTracker {
        &self.avalanches
    }

    /// Links created in the current budget period.
    pub const fn links_created_this_period(&self) -> u32 {
        self.link_budget.used()
    }
}

/// Execute one complete tick of `dt` seconds.
///
/// This is the main entry point for the engine. An invalid `dt` (negative
/// or not finite) is recorded as an anomaly and the tick runs with `dt = 0`.
///
/// # Errors
///
/// Returns [`TickError::Clock`] if the tick counter would overflow.
pub fn run_tick(state: &mut EngineState, dt: f64) -> Result<TickResult, TickError> {
    let mut anomalies = AnomalyLog::new();
    let mut events: Vec<TelemetryEvent> = Vec::new();

    // --- Phase 0: Clock ---
    let dt = EngineClock::validate_dt(dt).unwrap_or_else(|_| {
        anomalies.record(Anomaly::InvalidTimeStep { dt: dt.to_string() });
        0.0
    });
    let tick = state.clock.advance(dt)?;
    let config = &state.config;
    let threshold = config.diffusion.default_threshold;
    let params = state.global.params;
    debug!(tick, dt, alpha0 = params.alpha0, delta_state = params.delta_state, "Tick started");

    let start_energy = energy_map(&state.graph);
    let start_weights: BTreeMap<LinkId, f64> = state
        .graph
        .links()
        .map(|(id, link)| (id.clone(), link.weight))
        .collect();

    // --- Phase 1: Merge inputs ---
    let completions = collect_completions(&state.graph, &mut state.requested, tick);
    let inputs = std::mem::take(&mut state.pending);
    let reinforced = plasticity::apply_reinforcement(
        &mut state.graph,
        inputs.reinforcement,
        &config.plasticity,
        &mut anomalies,
    );
    let creation = plasticity::create_links(
        &mut state.graph,
        inputs.link_requests,
        tick,
        &mut state.link_budget,
        &config.plasticity,
        &mut anomalies,
    );
    for stim in &inputs.stimuli {
        let outcome = stimulus::inject(
            &mut state.graph,
            stim,
            config.stimulus_split,
            threshold,
            &mut anomalies,
        );
        if outcome.injected > 0.0 {
            state.clock.mark_stimulus();
        }
        events.push(TelemetryEvent::StimulusInjected {
            tick,
            energy_injected: outcome.injected,
            entry_nodes: count_u32(outcome.delivered.len()),
            skipped: outcome.skipped,
        });
    }
    // The learning gate compares against energies after the inputs landed.
    let pre_energy = energy_map(&state.graph);

    // --- Phase 2: Diffusion ---
    let stride = diffusion::diffuse(
        &mut state.graph,
        params.alpha0,
        dt,
        &config.diffusion,
        &config.diffusion.transition,
    );
    let arousal = diffusion::flow_weighted_arousal(&state.graph, &stride.traversals);
    events.push(TelemetryEvent::StrideExec {
        tick,
        traversals: count_u32(stride.traversals.len()),
        total_flow: stride.total_flow,
        active_nodes: count_u32(stride.active_nodes),
        alpha_eff: stride.alpha_eff,
    });

    // --- Phase 3: Decay ---
    let decayed = decay::decay_stage(
        &mut state.graph,
        params.delta_state,
        dt,
        config.diffusion.e_max,
        &config.decay,
        &mut anomalies,
    );
    debug!(
        tick,
        decayed = decayed.decayed,
        inhibited = decayed.inhibited,
        saturated = decayed.saturated,
        sanitized = decayed.sanitized,
        "Decay stage complete"
    );

    // --- Phase 4: Plasticity ---
    let ctx = LearningContext {
        tick,
        pre_energy: &pre_energy,
        previous_workspace: &state.previous_workspace,
        default_threshold: threshold,
    };
    let learning = plasticity::learn(&mut state.graph, &stride.traversals, &ctx, &config.plasticity);
    let _ = plasticity::decay_weights(&mut state.graph, dt, &config.plasticity);
    let pruned = plasticity::prune_probation(&mut state.graph, tick, &config.plasticity);
    events.push(TelemetryEvent::WeightsUpdated {
        tick,
        updated: learning.updated,
        gated: learning.gated,
        mean_abs_delta: learning.mean_abs_delta,
        created: count_u32(creation.created.len()),
        pruned: count_u32(pruned.len()),
    });

    // --- Phase 5: Criticality ---
    let global = criticality::estimate_rho(
        &state.graph,
        None,
        params,
        &config.diffusion,
        &config.criticality,
        &mut state.rng,
    );
    let mut per_entity_rho: BTreeMap<EntityId, f64> = BTreeMap::new();
    for channel in state.graph.channels() {
        let estimate = criticality::estimate_rho(
            &state.graph,
            Some(&channel),
            params,
            &config.diffusion,
            &config.criticality,
            &mut state.rng,
        );
        if estimate.valid {
            per_entity_rho.insert(channel, estimate.rho);
        }
    }
    let adjustment =
        state
            .controller
            .update(&global, &mut state.global.controller, &mut state.global.params);
    let safety = CriticalityController::safety(&global);
    if global.valid {
        events.push(TelemetryEvent::CriticalityTuned {
            tick,
            rho: global.rho,
            safety,
            alpha0_before: adjustment.before.alpha0,
            alpha0_after: adjustment.after.alpha0,
            delta_before: adjustment.before.delta_state,
            delta_after: adjustment.after.delta_state,
        });
    }

    let crossings = count_crossings(&start_energy, &state.graph, threshold);
    if let Some(size) = state.avalanches.observe(crossings) {
        debug!(tick, size, "Cascade ended");
    }
    let active_now = active_count(&state.graph, threshold);
    let branching = branching_ratio(active_now, state.previous_active);
    state.previous_active = active_now;

    // --- Phase 6: Emergence ---
    let emergence = state
        .entities
        .update(&state.graph, tick, threshold, &mut anomalies);
    debug!(
        tick,
        candidates = emergence.candidates,
        threshold = emergence.threshold,
        entities = state.entities.entities().len(),
        "Emergence updated"
    );
    events.extend(emergence.events);

    // --- Phase 7: Workspace ---
    let selection = workspace::select(
        &state.graph,
        state.entities.entities(),
        tick,
        threshold,
        &config.workspace,
    );
    state.previous_workspace = workspace_nodes(&selection, &state.entities.members_of());
    events.push(TelemetryEvent::WorkspaceSelected {
        tick,
        entries: selection.entries.clone(),
        capacity_used: selection.capacity_used,
    });

    // --- Phase 8: Commit ---
    let global_state = &mut state.global;
    global_state.tick = tick;
    global_state.sim_time = state.clock.sim_time();
    global_state.total_energy = state.graph.total_energy();
    global_state.per_entity_energy = state.graph.energy_by_channel();
    global_state.arousal = arousal;
    global_state.criticality = CriticalityState {
        global_rho: if global.valid { global.rho } else { 0.0 },
        per_entity_rho,
        safety,
        rho_variance: state.controller.rho_variance(),
        oscillation_index: state.controller.oscillation_index(),
        branching_ratio: branching,
        avalanche_exponent: state.avalanches.exponent(config.criticality.min_cascades),
        avalanche_count: count_u32(state.avalanches.completed()),
        avalanche_mean_size: state.avalanches.mean_size(),
        avalanche_mean_duration: state.avalanches.mean_duration(),
    };

    let mut delta = SnapshotDelta {
        tick,
        ..SnapshotDelta::default()
    };
    for (id, node) in state.graph.nodes() {
        if start_energy.get(id) != Some(&node.energy) {
            delta.node_energy.insert(id.clone(), node.energy.clone());
        }
    }
    for id in &reinforced.nodes {
        if let Some(node) = state.graph.node(id) {
            delta
                .node_reinforcement
                .insert(id.clone(), node.reinforcement_weight);
        }
    }
    for (id, link) in state.graph.links() {
        let changed = start_weights
            .get(id)
            .is_some_and(|before| (before - link.weight).abs() > f64::EPSILON);
        if changed {
            delta.link_weights.insert(id.clone(), link.weight);
        }
    }
    delta.created_links = creation
        .created
        .iter()
        .filter_map(|id| state.graph.link(id).cloned())
        .collect();
    delta.pruned_links = pruned;

    state.workspace = selection.clone();
    let anomalies = anomalies.drain();

    info!(
        tick,
        rho = global_state.criticality.global_rho,
        total_energy = global_state.total_energy,
        active_nodes = active_now,
        workspace = selection.entries.len(),
        entities = state.entities.entities().len(),
        anomalies = anomalies.len(),
        "Tick complete"
    );

    Ok(TickResult {
        tick,
        dt,
        selection,
        events,
        anomalies,
        delta,
        completions,
    })
}

/// Per-channel energy of every node.
fn energy_map(graph: &GraphSnapshot) -> BTreeMap<NodeId, BTreeMap<EntityId, f64>> {
    graph
        .nodes()
        .map(|(id, node)| (id.clone(), node.energy.clone()))
        .collect()
}

/// Completion requests for elements that became incomplete since the last
/// request. An element that completes and later turns incomplete again is
/// requested again.
fn collect_completions(
    graph: &GraphSnapshot,
    requested: &mut BTreeSet<ElementRef>,
    tick: u64,
) -> Vec<CompletionRequest> {
    let incomplete: BTreeSet<ElementRef> = graph.incomplete_elements().into_iter().collect();
    requested.retain(|element| incomplete.contains(element));
    incomplete
        .into_iter()
        .filter(|element| requested.insert(element.clone()))
        .map(|element| CompletionRequest { element, tick })
        .collect()
}

/// Node channels that rose from below to at-or-above their threshold.
fn count_crossings(
    start: &BTreeMap<NodeId, BTreeMap<EntityId, f64>>,
    graph: &GraphSnapshot,
    default_threshold: f64,
) -> u64 {
    let mut crossings = 0_u64;
    for (id, node) in graph.nodes() {
        let before = start.get(id);
        for entity in node.energy.keys() {
            let was = before
                .and_then(|channels| channels.get(entity))
                .copied()
                .unwrap_or(0.0);
            let threshold = node.threshold_for(entity, default_threshold);
            if was < threshold && node.energy_in(entity) >= threshold {
                crossings = crossings.saturating_add(1);
            }
        }
    }
    crossings
}

/// Complete nodes active in at least one channel.
fn active_count(graph: &GraphSnapshot, default_threshold: f64) -> usize {
    graph
        .nodes()
        .filter(|(_, node)| node.complete)
        .filter(|(_, node)| {
            node.energy
                .keys()
                .any(|entity| node.is_active_in(entity, default_threshold))
        })
        .count()
}

/// Nodes covered by a selection, directly or through entity membership.
fn workspace_nodes(
    selection: &WorkspaceSelection,
    members_of: &BTreeMap<EntityId, BTreeSet<NodeId>>,
) -> BTreeSet<NodeId> {
    let mut nodes = BTreeSet::new();
    for entry in &selection.entries {
        match &entry.item {
            WorkspaceItem::Node(id) => {
                nodes.insert(id.clone());
            }
            WorkspaceItem::Entity(id) => {
                if let Some(members) = members_of.get(id) {
                    nodes.extend(members.iter().cloned());
                }
            }
        }
    }
    nodes
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
