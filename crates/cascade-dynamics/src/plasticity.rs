//! Link plasticity: gated weight learning, weight decay, link creation with
//! probation, and external reinforcement.
//!
//! Learning is gated on activation onset: a traversal updates its link only
//! if both endpoints were below their channel threshold before the tick.
//! The update is the Oja rule
//!
//! ```text
//! dw = eta * m * (x_i x_j - x_j^2 w)
//! ```
//!
//! with `x_i` the energy moved and `x_j` the target's energy after receiving
//! it. `eta` is boosted when either endpoint was in the previous workspace
//! and `m` is an affective multiplier from the link's emotion vector. The
//! result is clamped to the link type's weight range.

use std::collections::{BTreeMap, BTreeSet};

use cascade_graph::GraphSnapshot;
use cascade_types::{
    Anomaly, CapacityKind, EntityId, Link, LinkId, LinkRequest, NodeId, Probation,
    ReinforcementSignal, ReinforcementTarget,
};

use crate::anomaly::AnomalyLog;
use crate::config::PlasticityConfig;
use crate::diffusion::Traversal;

// ---------------------------------------------------------------------------
// Weight learning
// ---------------------------------------------------------------------------

/// Inputs the learning step needs besides the graph.
#[derive(Debug, Clone, Copy)]
pub struct LearningContext<'a> {
    /// Current tick.
    pub tick: u64,
    /// Per-channel node energies recorded before diffusion.
    pub pre_energy: &'a BTreeMap<NodeId, BTreeMap<EntityId, f64>>,
    /// Nodes that were in the workspace on the previous tick.
    pub previous_workspace: &'a BTreeSet<NodeId>,
    /// Threshold for channels without a node override.
    pub default_threshold: f64,
}

/// Summary of the learning step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningOutcome {
    /// Traversals whose link weight was updated.
    pub updated: u32,
    /// Traversals skipped because an endpoint was already active.
    pub gated: u32,
    /// Mean absolute weight change over updated traversals.
    pub mean_abs_delta: f64,
    /// Links whose weight changed.
    pub touched: BTreeSet<LinkId>,
}

/// Affective learning multiplier for a link.
///
/// Pleasant, intense links learn faster and unpleasant ones slower; the
/// multiplier never drops below `affect_floor`.
pub fn affect_multiplier(link: &Link, config: &PlasticityConfig) -> f64 {
    let intensity = link.emotion.magnitude().tanh();
    let signed = if link.emotion.valence < 0.0 {
        -intensity
    } else {
        intensity
    };
    config
        .affect_kappa
        .mul_add(signed, 1.0)
        .max(config.affect_floor)
}

/// Oja weight change for one traversal.
pub fn oja_delta(eta: f64, flow: f64, target_energy: f64, weight: f64) -> f64 {
    let post = target_energy + flow;
    eta * (flow * post - post * post * weight)
}

/// Apply gated Oja learning for every traversal of the stride.
pub fn learn(
    graph: &mut GraphSnapshot,
    traversals: &[Traversal],
    ctx: &LearningContext<'_>,
    config: &PlasticityConfig,
) -> LearningOutcome {
    let mut outcome = LearningOutcome::default();
    let mut total_delta = 0.0;

    for traversal in traversals {
        let below = |node_id: &NodeId| -> bool {
            let pre = ctx
                .pre_energy
                .get(node_id)
                .and_then(|channels| channels.get(&traversal.entity))
                .copied()
                .unwrap_or(0.0);
            let threshold = graph
                .node(node_id)
                .map_or(ctx.default_threshold, |n| {
                    n.threshold_for(&traversal.entity, ctx.default_threshold)
                });
            pre < threshold
        };
        let gate_open = below(&traversal.source) && below(&traversal.target);
        let in_workspace = ctx.previous_workspace.contains(&traversal.source)
            || ctx.previous_workspace.contains(&traversal.target);

        let Some(link) = graph.link_mut(&traversal.link) else {
            continue;
        };
        link.stats
            .record(traversal.flow, ctx.tick, config.traversal_beta);

        if !gate_open {
            outcome.gated = outcome.gated.saturating_add(1);
            continue;
        }

        let eta = if in_workspace {
            config.learning_rate * config.workspace_boost
        } else {
            config.learning_rate
        };
        let multiplier = affect_multiplier(link, config);
        let delta = oja_delta(
            eta * multiplier,
            traversal.flow,
            traversal.target_energy,
            link.weight,
        );
        let bounds = config.link_params(link.link_type);
        let updated = bounds.clamp(link.weight + delta);
        if updated.is_finite() {
            total_delta += (updated - link.weight).abs();
            link.weight = updated;
            outcome.touched.insert(link.id.clone());
        }
        outcome.updated = outcome.updated.saturating_add(1);
    }

    if outcome.updated > 0 {
        outcome.mean_abs_delta = total_delta / f64::from(outcome.updated);
    }
    outcome
}

/// Slow exponential weight decay, per link type.
///
/// Weights relax toward the point of the type's `[w_min, w_max]` range
/// nearest zero, so a type with a positive floor never decays below it.
pub fn decay_weights(graph: &mut GraphSnapshot, dt: f64, config: &PlasticityConfig) -> usize {
    let mut changed = 0_usize;
    for (_, link) in graph.links_mut() {
        let bounds = config.link_params(link.link_type);
        let rest = bounds.clamp(0.0);
        if bounds.weight_decay <= 0.0 || (link.weight - rest).abs() <= f64::EPSILON {
            continue;
        }
        let decayed = rest + (link.weight - rest) * (-bounds.weight_decay * dt).exp();
        link.weight = bounds.clamp(decayed);
        changed = changed.saturating_add(1);
    }
    changed
}

// ---------------------------------------------------------------------------
// Link creation
// ---------------------------------------------------------------------------

/// Per-period link-creation budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkBudget {
    period_start: u64,
    used: u32,
}

impl LinkBudget {
    /// Create a budget starting at tick zero.
    pub const fn new() -> Self {
        Self {
            period_start: 0,
            used: 0,
        }
    }

    /// Try to spend one creation at `tick`.
    pub fn try_spend(&mut self, tick: u64, config: &PlasticityConfig) -> bool {
        if tick.saturating_sub(self.period_start) >= config.budget_period_ticks {
            self.period_start = tick;
            self.used = 0;
        }
        if self.used >= config.link_budget {
            return false;
        }
        self.used = self.used.saturating_add(1);
        true
    }

    /// Creations spent in the current period.
    pub const fn used(&self) -> u32 {
        self.used
    }
}

/// Summary of the link-creation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreationOutcome {
    /// Links created.
    pub created: Vec<LinkId>,
    /// Requests merged into an existing link.
    pub merged: Vec<LinkId>,
    /// Requests rejected.
    pub rejected: u32,
}

/// Process link-creation requests.
///
/// A request matching an existing link (same id, or same endpoints and
/// type) is merged: the existing weight becomes the larger of the two.
/// New links start on probation and count against the creation budget and
/// the source's out-degree cap.
pub fn create_links(
    graph: &mut GraphSnapshot,
    requests: Vec<LinkRequest>,
    tick: u64,
    budget: &mut LinkBudget,
    config: &PlasticityConfig,
    anomalies: &mut AnomalyLog,
) -> CreationOutcome {
    let mut outcome = CreationOutcome::default();
    for request in requests {
        let bounds = config.link_params(request.link_type);
        let weight = bounds.clamp(request.initial_weight);
        if !weight.is_finite() {
            outcome.rejected = outcome.rejected.saturating_add(1);
            anomalies.record(Anomaly::DataIncomplete {
                element: format!("{}->{}", request.source, request.target),
                detail: "link request weight is not finite".into(),
            });
            continue;
        }

        let existing = request
            .id
            .as_ref()
            .filter(|id| graph.link(id).is_some())
            .cloned()
            .or_else(|| {
                graph
                    .find_link(&request.source, &request.target, request.link_type)
                    .map(|l| l.id.clone())
            });
        if let Some(id) = existing {
            if let Some(link) = graph.link_mut(&id) {
                link.weight = link.weight.max(weight);
            }
            anomalies.record(Anomaly::DuplicateCollision {
                existing: id.clone(),
            });
            outcome.merged.push(id);
            continue;
        }

        let source_ok = graph.node(&request.source).is_some_and(|n| n.complete);
        let target_ok = graph.node(&request.target).is_some_and(|n| n.complete);
        if !source_ok || !target_ok || request.source == request.target {
            outcome.rejected = outcome.rejected.saturating_add(1);
            anomalies.record(Anomaly::DataIncomplete {
                element: format!("{}->{}", request.source, request.target),
                detail: "link request endpoints are unknown, incomplete, or identical".into(),
            });
            continue;
        }
        if graph.out_degree(&request.source) >= config.max_out_degree {
            outcome.rejected = outcome.rejected.saturating_add(1);
            anomalies.record(Anomaly::CapacityExceeded {
                resource: CapacityKind::OutDegree,
                element: request.source.to_string(),
            });
            continue;
        }
        if !budget.try_spend(tick, config) {
            outcome.rejected = outcome.rejected.saturating_add(1);
            anomalies.record(Anomaly::CapacityExceeded {
                resource: CapacityKind::LinkBudget,
                element: request.source.to_string(),
            });
            continue;
        }

        let id = request.id.unwrap_or_else(LinkId::generate);
        let mut link = Link::new(id.clone(), request.source, request.target, request.link_type, weight);
        link.probation = Some(Probation { created_tick: tick });
        match graph.add_link(link) {
            Ok(()) => outcome.created.push(id),
            Err(err) => {
                outcome.rejected = outcome.rejected.saturating_add(1);
                tracing::warn!(link = %id, error = %err, "Link creation failed");
            }
        }
    }
    outcome
}

/// Remove links whose probation expired without reinforcement.
pub fn prune_probation(graph: &mut GraphSnapshot, tick: u64, config: &PlasticityConfig) -> Vec<LinkId> {
    let expired: Vec<LinkId> = graph
        .links()
        .filter(|(_, link)| {
            link.probation.is_some_and(|p| {
                tick.saturating_sub(p.created_tick) >= config.probation_ticks
            })
        })
        .map(|(id, _)| id.clone())
        .collect();
    for id in &expired {
        if let Err(err) = graph.remove_link(id) {
            tracing::warn!(link = %id, error = %err, "Probation prune failed");
        }
    }
    expired
}

// ---------------------------------------------------------------------------
// Reinforcement
// ---------------------------------------------------------------------------

/// Elements changed by reinforcement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReinforcementOutcome {
    /// Links whose weight changed.
    pub links: BTreeSet<LinkId>,
    /// Nodes whose learned weight changed.
    pub nodes: BTreeSet<NodeId>,
}

/// Fold external reinforcement signals into links and nodes.
///
/// Links keep a slow EMA of their reinforcement and move their weight by
/// `rate * ema`; a positive signal ends probation. The signal's channel, if
/// given, also updates the link's valence for that channel. Nodes keep the
/// EMA directly as their learned weight.
pub fn apply_reinforcement(
    graph: &mut GraphSnapshot,
    signals: Vec<ReinforcementSignal>,
    config: &PlasticityConfig,
    anomalies: &mut AnomalyLog,
) -> ReinforcementOutcome {
    let beta = config.reinforcement_beta;
    let mut outcome = ReinforcementOutcome::default();
    for signal in signals {
        if !signal.delta.is_finite() {
            anomalies.record(Anomaly::DataIncomplete {
                element: format!("{:?}", signal.target),
                detail: "reinforcement delta is not finite".into(),
            });
            continue;
        }
        match signal.target {
            ReinforcementTarget::Link(id) => {
                let Some(link) = graph.link_mut(&id) else {
                    anomalies.record(Anomaly::DataIncomplete {
                        element: id.to_string(),
                        detail: "reinforced link is unknown".into(),
                    });
                    continue;
                };
                link.reinforcement_ema =
                    beta.mul_add(signal.delta, (1.0 - beta) * link.reinforcement_ema);
                let bounds = config.link_params(link.link_type);
                link.weight = bounds.clamp(
                    config
                        .reinforcement_rate
                        .mul_add(link.reinforcement_ema, link.weight),
                );
                if let Some(entity) = signal.entity {
                    let previous = link.valence_for(&entity);
                    let sample = signal.delta.clamp(-1.0, 1.0);
                    link.valence
                        .insert(entity, beta.mul_add(sample, (1.0 - beta) * previous));
                }
                if signal.delta > 0.0 {
                    link.probation = None;
                }
                outcome.links.insert(id);
            }
            ReinforcementTarget::Node(id) => {
                let Some(node) = graph.node_mut(&id) else {
                    anomalies.record(Anomaly::DataIncomplete {
                        element: id.to_string(),
                        detail: "reinforced node is unknown".into(),
                    });
                    continue;
                };
                node.reinforcement_weight =
                    beta.mul_add(signal.delta, (1.0 - beta) * node.reinforcement_weight);
                outcome.nodes.insert(id);
            }
        }
    }
    outcome
}
