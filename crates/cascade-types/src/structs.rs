//! Core data structures: graph nodes and links, external inputs, emergent
//! entities, workspace selections, and the per-tick global state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{LinkType, NodeType, SafetyState};
use crate::ids::{EntityId, LinkId, NodeId};

/// Floor applied before taking the logarithm of a weight.
const LOG_WEIGHT_FLOOR: f64 = 1e-9;

const fn default_true() -> bool {
    true
}

const fn default_unit() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A node in the activation graph.
///
/// Energy is held per entity channel. Channels with zero energy are not
/// stored, so an empty map means the node is fully at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned identifier.
    pub id: NodeId,
    /// Kind of content; selects the state-decay multiplier.
    #[serde(default)]
    pub node_type: NodeType,
    /// Energy per entity channel. Values are never negative.
    #[serde(default)]
    pub energy: BTreeMap<EntityId, f64>,
    /// Externally produced embedding vector.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Structural weight assigned by the store.
    #[serde(default = "default_unit")]
    pub base_weight: f64,
    /// Learned weight adjustment fed by external reinforcement.
    #[serde(default)]
    pub reinforcement_weight: f64,
    /// Per-channel activation thresholds overriding the configured default.
    #[serde(default)]
    pub thresholds: BTreeMap<EntityId, f64>,
    /// Workspace capacity consumed when this node is selected.
    #[serde(default = "default_unit")]
    pub cost: f64,
    /// False while required fields are still loading in the store.
    #[serde(default = "default_true")]
    pub complete: bool,
}

impl Node {
    /// Create a complete node with default weights and no energy.
    pub fn new(id: impl Into<NodeId>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            energy: BTreeMap::new(),
            embedding: None,
            base_weight: 1.0,
            reinforcement_weight: 0.0,
            thresholds: BTreeMap::new(),
            cost: 1.0,
            complete: true,
        }
    }

    /// Energy held in one channel (zero when absent).
    pub fn energy_in(&self, entity: &EntityId) -> f64 {
        self.energy.get(entity).copied().unwrap_or(0.0)
    }

    /// Set the energy of one channel. Zero removes the channel entry.
    pub fn set_energy(&mut self, entity: &EntityId, value: f64) {
        if value > 0.0 {
            self.energy.insert(entity.clone(), value);
        } else {
            self.energy.remove(entity);
        }
    }

    /// Sum of energy across all channels.
    pub fn total_energy(&self) -> f64 {
        self.energy.values().sum()
    }

    /// Activation threshold for a channel, falling back to `default`.
    pub fn threshold_for(&self, entity: &EntityId, default: f64) -> f64 {
        self.thresholds.get(entity).copied().unwrap_or(default)
    }

    /// Whether the channel's energy is at or above its activation threshold.
    pub fn is_active_in(&self, entity: &EntityId, default_threshold: f64) -> bool {
        self.energy_in(entity) >= self.threshold_for(entity, default_threshold)
    }

    /// The channel holding the most energy. Ties go to the smallest id.
    pub fn dominant_channel(&self) -> Option<(&EntityId, f64)> {
        let mut best: Option<(&EntityId, f64)> = None;
        for (entity, &value) in &self.energy {
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((entity, value)),
            }
        }
        best
    }

    /// Natural log of the combined structural and learned weight.
    pub fn log_weight(&self) -> f64 {
        (self.base_weight + self.reinforcement_weight)
            .max(LOG_WEIGHT_FLOOR)
            .ln()
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Valence/arousal/dominance vector attached to a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionVector {
    /// Pleasantness, roughly in [-1, 1].
    pub valence: f64,
    /// Activation intensity, roughly in [0, 1].
    pub arousal: f64,
    /// Sense of control, roughly in [-1, 1].
    pub dominance: f64,
}

impl EmotionVector {
    /// Euclidean magnitude of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.valence * self.valence
            + self.arousal * self.arousal
            + self.dominance * self.dominance)
            .sqrt()
    }
}

/// Exponential-moving-average statistics over a link's traversals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalStats {
    /// EMA of energy moved across the link per traversal.
    pub ema_flow: f64,
    /// Total number of traversals observed.
    pub traversals: u64,
    /// Tick of the most recent traversal.
    pub last_tick: Option<u64>,
}

impl TraversalStats {
    /// Fold one traversal into the statistics.
    pub fn record(&mut self, flow: f64, tick: u64, beta: f64) {
        self.ema_flow = if self.traversals == 0 {
            flow
        } else {
            beta.mul_add(flow, (1.0 - beta) * self.ema_flow)
        };
        self.traversals = self.traversals.saturating_add(1);
        self.last_tick = Some(tick);
    }
}

/// Marker for a link that has not yet been confirmed by reinforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probation {
    /// Tick at which the link was created.
    pub created_tick: u64,
}

/// A directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Store-assigned or engine-generated identifier.
    pub id: LinkId,
    /// Node the link departs from.
    pub source: NodeId,
    /// Node the link arrives at.
    pub target: NodeId,
    /// Relation kind; bounds the weight and sets its decay rate.
    #[serde(default)]
    pub link_type: LinkType,
    /// Link strength. Negative only for inhibitory links.
    pub weight: f64,
    /// Externally produced embedding vector.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Affective coloring of the relation.
    #[serde(default)]
    pub emotion: EmotionVector,
    /// Per-channel valence learned from reinforcement.
    #[serde(default)]
    pub valence: BTreeMap<EntityId, f64>,
    /// Traversal statistics.
    #[serde(default)]
    pub stats: TraversalStats,
    /// Slow EMA of external reinforcement deltas.
    #[serde(default)]
    pub reinforcement_ema: f64,
    /// Set while a freshly created link awaits its first reinforcement.
    #[serde(default)]
    pub probation: Option<Probation>,
    /// False while required fields are still loading in the store.
    #[serde(default = "default_true")]
    pub complete: bool,
}

impl Link {
    /// Create a complete link with neutral emotion and empty statistics.
    pub fn new(
        id: impl Into<LinkId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        link_type: LinkType,
        weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            link_type,
            weight,
            embedding: None,
            emotion: EmotionVector::default(),
            valence: BTreeMap::new(),
            stats: TraversalStats::default(),
            reinforcement_ema: 0.0,
            probation: None,
            complete: true,
        }
    }

    /// Valence recorded for a channel (zero when absent).
    pub fn valence_for(&self, entity: &EntityId) -> f64 {
        self.valence.get(entity).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// External inputs
// ---------------------------------------------------------------------------

/// An external stimulus: an energy budget delivered to entry nodes and
/// split across entity channels by `entity_mix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    /// Total energy to inject.
    pub energy_budget: f64,
    /// Nodes that receive the energy.
    pub entry_nodes: Vec<NodeId>,
    /// Relative share per channel; normalized on injection.
    pub entity_mix: BTreeMap<EntityId, f64>,
}

/// What an external reinforcement signal refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReinforcementTarget {
    /// A node's learned weight.
    Node(NodeId),
    /// A link's weight.
    Link(LinkId),
}

/// A reinforcement delta produced by the external annotation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementSignal {
    /// The reinforced node or link.
    pub target: ReinforcementTarget,
    /// Signed reinforcement strength.
    pub delta: f64,
    /// Channel the annotation was produced in, if known.
    #[serde(default)]
    pub entity: Option<EntityId>,
}

/// A request to create a new link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    /// Explicit id, if the requester already has one.
    #[serde(default)]
    pub id: Option<LinkId>,
    /// Source node.
    pub source: NodeId,
    /// Target node.
    pub target: NodeId,
    /// Starting weight; clamped into the type's range.
    pub initial_weight: f64,
    /// Relation kind.
    pub link_type: LinkType,
}

// ---------------------------------------------------------------------------
// Emergent entities
// ---------------------------------------------------------------------------

/// A coherent, energy-dense cluster recognized as an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EmergentEntity {
    /// Entity id (the channel id, or a derived id for secondary clusters).
    pub id: EntityId,
    /// Energy channel the cluster lives in.
    pub channel: EntityId,
    /// Member nodes.
    pub members: BTreeSet<NodeId>,
    /// Total channel energy over the members.
    pub energy: f64,
    /// Coherence score Q in [0, 1].
    pub coherence: f64,
    /// Emergence score S = E * Q.
    pub score: f64,
    /// Tick at which the entity emerged.
    pub born_tick: u64,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// An item eligible for the workspace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum WorkspaceItem {
    /// A single node outside every entity.
    Node(NodeId),
    /// An emergent entity.
    Entity(EntityId),
}

impl core::fmt::Display for WorkspaceItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node:{id}"),
            Self::Entity(id) => write!(f, "entity:{id}"),
        }
    }
}

/// One selected workspace item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkspaceEntry {
    /// The selected item.
    pub item: WorkspaceItem,
    /// Selection score.
    pub score: f64,
    /// Energy the item carried when selected.
    pub energy: f64,
    /// Capacity consumed.
    pub cost: f64,
}

/// The result of one workspace selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkspaceSelection {
    /// Tick the selection was made at.
    pub tick: u64,
    /// Selected items, highest score first.
    pub entries: Vec<WorkspaceEntry>,
    /// Capacity consumed by the entries.
    pub capacity_used: f64,
    /// Capacity available.
    pub capacity_budget: f64,
    /// Candidates left out for lack of capacity.
    pub truncated: u32,
    /// Candidates folded into a canonical duplicate.
    pub deduplicated: u32,
}

impl WorkspaceSelection {
    /// The selection as an ordered `(item, score)` list.
    pub fn ranked(&self) -> Vec<(WorkspaceItem, f64)> {
        self.entries
            .iter()
            .map(|entry| (entry.item.clone(), entry.score))
            .collect()
    }

    /// Whether a node is selected directly or through an entity in
    /// `members_of`.
    pub fn contains_node(
        &self,
        node: &NodeId,
        members_of: &BTreeMap<EntityId, BTreeSet<NodeId>>,
    ) -> bool {
        self.entries.iter().any(|entry| match &entry.item {
            WorkspaceItem::Node(id) => id == node,
            WorkspaceItem::Entity(id) => members_of
                .get(id)
                .is_some_and(|members| members.contains(node)),
        })
    }
}

// ---------------------------------------------------------------------------
// Criticality and global state
// ---------------------------------------------------------------------------

/// Diffusion and decay parameters retuned by the criticality controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TunedParams {
    /// Diffusion mixing base per reference interval.
    pub alpha0: f64,
    /// State decay rate per second before node-type multipliers.
    pub delta_state: f64,
}

/// Integral-error state of the criticality PI controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Clamped integral of `rho - 1`.
    pub integral: f64,
    /// Error observed on the last update.
    pub last_error: f64,
    /// Controller output on the last adjustment.
    pub last_output: f64,
    /// Number of ticks on which parameters were adjusted.
    pub adjustments: u64,
}

/// Spectral-radius estimates and controller diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CriticalityState {
    /// Spectral radius over the whole active subgraph (0 when inactive).
    pub global_rho: f64,
    /// Spectral radius per entity channel.
    pub per_entity_rho: BTreeMap<EntityId, f64>,
    /// Regime classification of `global_rho`.
    pub safety: SafetyState,
    /// Variance of recent `global_rho` values.
    pub rho_variance: f64,
    /// Fraction of recent error sign changes, in [0, 1].
    pub oscillation_index: f64,
    /// Active-node count ratio between this tick and the previous one.
    pub branching_ratio: f64,
    /// Fitted avalanche size exponent (negative), once enough cascades exist.
    pub avalanche_exponent: Option<f64>,
    /// Completed cascades on record.
    pub avalanche_count: u32,
    /// Mean cascade size in threshold crossings.
    pub avalanche_mean_size: f64,
    /// Mean cascade duration in ticks.
    pub avalanche_mean_duration: f64,
}

/// Global engine state, passed explicitly through each phase and updated
/// once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Number of completed ticks.
    pub tick: u64,
    /// Simulated seconds elapsed across all ticks.
    pub sim_time: f64,
    /// Total energy across nodes and channels.
    pub total_energy: f64,
    /// Total energy per channel.
    pub per_entity_energy: BTreeMap<EntityId, f64>,
    /// Flow-weighted arousal of the links traversed this tick.
    pub arousal: f64,
    /// Current tunable parameters.
    pub params: TunedParams,
    /// Controller memory.
    pub controller: ControllerState,
    /// Latest spectral-radius estimates.
    pub criticality: CriticalityState,
}

impl GlobalState {
    /// Fresh state at tick zero with the given starting parameters.
    pub fn new(params: TunedParams) -> Self {
        Self {
            tick: 0,
            sim_time: 0.0,
            total_energy: 0.0,
            per_entity_energy: BTreeMap::new(),
            arousal: 0.0,
            params,
            controller: ControllerState::default(),
            criticality: CriticalityState::default(),
        }
    }
}
