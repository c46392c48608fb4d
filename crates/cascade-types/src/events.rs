//! Telemetry events and steady-state anomalies.
//!
//! Every phase of a tick reports what it did through a [`TelemetryEvent`].
//! Events carry a dotted name (`stimulus.injected`, `stride.exec`, ...) that
//! doubles as the serde tag, so a JSON consumer can dispatch on the `event`
//! field without knowing the Rust enum.
//!
//! [`Anomaly`] covers the conditions the engine tolerates and keeps running
//! through: incomplete store data, numerical noise, capacity limits, and
//! duplicate links. They are reported, never raised as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::SafetyState;
use crate::ids::{EntityId, LinkId, NodeId};
use crate::structs::WorkspaceEntry;

/// Why an entity stopped being recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DissolveReason {
    /// Its score fell below the persistence band.
    BelowThreshold,
    /// No candidate cluster overlapped its members any more.
    Vanished,
    /// It was absorbed by a stronger entity.
    Merged,
    /// The active-entity cap evicted it.
    CapExceeded,
}

/// One observable event emitted during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event")]
#[ts(export, export_to = "bindings/")]
pub enum TelemetryEvent {
    /// A stimulus was delivered to its entry nodes.
    #[serde(rename = "stimulus.injected")]
    StimulusInjected {
        /// Tick the stimulus was merged at.
        tick: u64,
        /// Energy actually delivered.
        energy_injected: f64,
        /// Entry nodes that received energy.
        entry_nodes: u32,
        /// Entry nodes skipped as unknown or incomplete.
        skipped: u32,
    },
    /// Summary of one diffusion stride.
    #[serde(rename = "stride.exec")]
    StrideExec {
        /// Tick number.
        tick: u64,
        /// Source-to-target transfers performed.
        traversals: u32,
        /// Total energy moved along links.
        total_flow: f64,
        /// Nodes above the activity epsilon before the stride.
        active_nodes: u32,
        /// Effective mixing coefficient used.
        alpha_eff: f64,
    },
    /// Outcome of the plasticity phase.
    #[serde(rename = "weights.updated")]
    WeightsUpdated {
        /// Tick number.
        tick: u64,
        /// Traversals whose weight was updated.
        updated: u32,
        /// Traversals skipped because an endpoint was already active.
        gated: u32,
        /// Mean absolute weight change over updated links.
        mean_abs_delta: f64,
        /// Links created this tick.
        created: u32,
        /// Probationary links pruned this tick.
        pruned: u32,
    },
    /// Spectral radius measured and parameters retuned.
    #[serde(rename = "criticality.tuned")]
    CriticalityTuned {
        /// Tick number.
        tick: u64,
        /// Global spectral radius estimate.
        rho: f64,
        /// Regime classification.
        safety: SafetyState,
        /// Mixing base before the adjustment.
        alpha0_before: f64,
        /// Mixing base after the adjustment.
        alpha0_after: f64,
        /// State decay rate before the adjustment.
        delta_before: f64,
        /// State decay rate after the adjustment.
        delta_after: f64,
    },
    /// A cluster crossed the emergence threshold.
    #[serde(rename = "entity.emerged")]
    EntityEmerged {
        /// Tick number.
        tick: u64,
        /// New entity.
        entity: EntityId,
        /// Member count.
        members: u32,
        /// Emergence score.
        score: f64,
        /// Threshold in force.
        threshold: f64,
    },
    /// An entity stopped being recognized.
    #[serde(rename = "entity.dissolved")]
    EntityDissolved {
        /// Tick number.
        tick: u64,
        /// Dissolved entity.
        entity: EntityId,
        /// Why it dissolved.
        reason: DissolveReason,
    },
    /// An entity's members separated into two clusters.
    #[serde(rename = "entity.split")]
    EntitySplit {
        /// Tick number.
        tick: u64,
        /// Entity that kept its id.
        entity: EntityId,
        /// Newly identified sibling.
        offspring: EntityId,
    },
    /// Two entities collapsed into one cluster.
    #[serde(rename = "entity.merged")]
    EntityMerged {
        /// Tick number.
        tick: u64,
        /// Surviving entity.
        survivor: EntityId,
        /// Absorbed entity.
        absorbed: EntityId,
    },
    /// The workspace was selected.
    #[serde(rename = "workspace.selected")]
    WorkspaceSelected {
        /// Tick number.
        tick: u64,
        /// Selected entries in rank order.
        entries: Vec<WorkspaceEntry>,
        /// Capacity consumed.
        capacity_used: f64,
    },
}

impl TelemetryEvent {
    /// The dotted event name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StimulusInjected { .. } => "stimulus.injected",
            Self::StrideExec { .. } => "stride.exec",
            Self::WeightsUpdated { .. } => "weights.updated",
            Self::CriticalityTuned { .. } => "criticality.tuned",
            Self::EntityEmerged { .. } => "entity.emerged",
            Self::EntityDissolved { .. } => "entity.dissolved",
            Self::EntitySplit { .. } => "entity.split",
            Self::EntityMerged { .. } => "entity.merged",
            Self::WorkspaceSelected { .. } => "workspace.selected",
        }
    }

    /// Tick the event belongs to.
    pub const fn tick(&self) -> u64 {
        match self {
            Self::StimulusInjected { tick, .. }
            | Self::StrideExec { tick, .. }
            | Self::WeightsUpdated { tick, .. }
            | Self::CriticalityTuned { tick, .. }
            | Self::EntityEmerged { tick, .. }
            | Self::EntityDissolved { tick, .. }
            | Self::EntitySplit { tick, .. }
            | Self::EntityMerged { tick, .. }
            | Self::WorkspaceSelected { tick, .. } => *tick,
        }
    }
}

/// A telemetry event stamped with wall-clock emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

impl TelemetryRecord {
    /// Stamp an event with the current time.
    pub fn now(event: TelemetryEvent) -> Self {
        Self {
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Which bounded resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CapacityKind {
    /// Per-period link-creation budget.
    LinkBudget,
    /// Per-node outgoing-link cap.
    OutDegree,
    /// Maximum simultaneously active entities.
    ActiveEntities,
}

/// A tolerated steady-state anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Anomaly {
    /// A node or link was skipped because the store has not finished
    /// loading it, or because it references something unknown.
    DataIncomplete {
        /// Identifier of the skipped element.
        element: String,
        /// What was missing.
        detail: String,
    },
    /// A non-finite or negative energy was replaced with zero.
    NumericalAnomaly {
        /// Affected node.
        node: NodeId,
        /// Affected channel.
        entity: EntityId,
        /// The rejected value, rendered as text (it may be NaN).
        value: String,
    },
    /// The tick interval was not a positive finite number.
    InvalidTimeStep {
        /// The rejected interval, rendered as text.
        dt: String,
    },
    /// A bounded resource rejected a request.
    CapacityExceeded {
        /// Which resource.
        resource: CapacityKind,
        /// Element the request concerned.
        element: String,
    },
    /// A link request collided with an existing link and was merged.
    DuplicateCollision {
        /// The pre-existing link.
        existing: LinkId,
    },
}

impl Anomaly {
    /// Short machine-readable anomaly kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DataIncomplete { .. } => "data_incomplete",
            Self::NumericalAnomaly { .. } => "numerical_anomaly",
            Self::InvalidTimeStep { .. } => "invalid_time_step",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::DuplicateCollision { .. } => "duplicate_collision",
        }
    }
}
