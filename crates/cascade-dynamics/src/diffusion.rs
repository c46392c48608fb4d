//! Energy diffusion along weighted links.
//!
//! Each entity channel diffuses independently. Per channel the stride is the
//! mixing update
//!
//! ```text
//! e' = (1 - alpha) e + alpha P^T e
//! ```
//!
//! where `P` is the row-normalized transition matrix over *active* sources
//! (energy above epsilon). Every traversable, non-inhibitory outgoing link of
//! an active source is a candidate target, so energy flows into the frontier
//! of inactive neighbors as well. A source with no usable outgoing link keeps
//! all of its energy. The stride conserves energy exactly up to rounding.
//!
//! All transfers are computed from the pre-stride energies and applied at
//! once, so the order in which nodes are visited does not matter.

use std::collections::BTreeMap;

use cascade_graph::GraphSnapshot;
use cascade_types::{EntityId, Link, LinkId, NodeId};

use crate::config::{DiffusionConfig, TransitionRule};

// ---------------------------------------------------------------------------
// Transition strategies
// ---------------------------------------------------------------------------

/// Scores a link as a path for one channel's energy.
///
/// A source splits its outflow across its links in proportion to their
/// scores. Scores must be finite and non-negative; a zero score excludes the
/// link for that channel.
pub trait TransitionStrategy {
    /// Preference for moving `entity` energy along `link`.
    fn link_score(&self, link: &Link, entity: &EntityId) -> f64;
}

/// Shares proportional to the positive part of the link weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightProportional;

impl TransitionStrategy for WeightProportional {
    fn link_score(&self, link: &Link, _entity: &EntityId) -> f64 {
        link.weight.max(0.0)
    }
}

/// Weight-proportional shares tilted by the channel's learned valence.
///
/// A link the channel has found rewarding gains up to `1 + bias` times its
/// plain share; an aversive one loses down to `1 - bias`.
#[derive(Debug, Clone, Copy)]
pub struct ValenceBiased {
    /// Strength of the tilt, in [0, 1].
    pub bias: f64,
}

impl TransitionStrategy for ValenceBiased {
    fn link_score(&self, link: &Link, entity: &EntityId) -> f64 {
        let tilt = self.bias.mul_add(link.valence_for(entity).tanh(), 1.0);
        (link.weight.max(0.0) * tilt).max(0.0)
    }
}

impl TransitionStrategy for TransitionRule {
    fn link_score(&self, link: &Link, entity: &EntityId) -> f64 {
        match *self {
            Self::WeightProportional => WeightProportional.link_score(link, entity),
            Self::ValenceBiased { bias } => ValenceBiased { bias }.link_score(link, entity),
        }
    }
}

// ---------------------------------------------------------------------------
// Stride
// ---------------------------------------------------------------------------

/// One source-to-target energy transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    /// Link the energy moved along.
    pub link: LinkId,
    /// Source node.
    pub source: NodeId,
    /// Target node.
    pub target: NodeId,
    /// Channel the energy belongs to.
    pub entity: EntityId,
    /// Energy moved.
    pub flow: f64,
    /// Source channel energy before the stride.
    pub source_energy: f64,
    /// Target channel energy before the stride.
    pub target_energy: f64,
}

/// Result of one diffusion stride.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrideOutcome {
    /// Every transfer performed, grouped by channel then source.
    pub traversals: Vec<Traversal>,
    /// Total energy moved along links.
    pub total_flow: f64,
    /// Distinct nodes active in at least one channel before the stride.
    pub active_nodes: usize,
    /// Mixing coefficient used.
    pub alpha_eff: f64,
}

/// Run one diffusion stride of `dt` seconds.
pub fn diffuse(
    graph: &mut GraphSnapshot,
    alpha0: f64,
    dt: f64,
    config: &DiffusionConfig,
    strategy: &impl TransitionStrategy,
) -> StrideOutcome {
    let alpha = config.alpha_eff(alpha0, dt);
    let mut outcome = StrideOutcome {
        alpha_eff: alpha,
        ..StrideOutcome::default()
    };

    let mut active_any: Vec<NodeId> = Vec::new();
    let mut deltas: BTreeMap<(NodeId, EntityId), f64> = BTreeMap::new();

    for entity in graph.channels() {
        let sources: Vec<(NodeId, f64)> = graph
            .nodes()
            .filter(|(_, node)| node.complete)
            .map(|(id, node)| (id.clone(), node.energy_in(&entity)))
            .filter(|(_, energy)| *energy > config.epsilon)
            .collect();

        for (source, energy) in sources {
            active_any.push(source.clone());
            if alpha <= 0.0 {
                continue;
            }
            let scored: Vec<(&Link, f64)> = graph
                .outgoing(&source)
                .into_iter()
                .filter(|link| !link.link_type.is_inhibitory())
                .map(|link| (link, strategy.link_score(link, &entity)))
                .filter(|(_, score)| score.is_finite() && *score > 0.0)
                .collect();
            let total: f64 = scored.iter().map(|(_, score)| score).sum();
            if total <= 0.0 {
                continue;
            }

            let outflow = alpha * energy;
            *deltas
                .entry((source.clone(), entity.clone()))
                .or_insert(0.0) -= outflow;
            for (link, score) in scored {
                let flow = outflow * score / total;
                *deltas
                    .entry((link.target.clone(), entity.clone()))
                    .or_insert(0.0) += flow;
                let target_energy = graph
                    .node(&link.target)
                    .map_or(0.0, |n| n.energy_in(&entity));
                outcome.total_flow += flow;
                outcome.traversals.push(Traversal {
                    link: link.id.clone(),
                    source: source.clone(),
                    target: link.target.clone(),
                    entity: entity.clone(),
                    flow,
                    source_energy: energy,
                    target_energy,
                });
            }
        }
    }

    for ((node_id, entity), delta) in deltas {
        if let Some(node) = graph.node_mut(&node_id) {
            let updated = (node.energy_in(&entity) + delta).max(0.0);
            node.set_energy(&entity, updated);
        }
    }

    active_any.sort();
    active_any.dedup();
    outcome.active_nodes = active_any.len();
    tracing::trace!(
        traversals = outcome.traversals.len(),
        total_flow = outcome.total_flow,
        alpha_eff = alpha,
        "Diffusion stride"
    );
    outcome
}

/// Flow-weighted mean arousal of the links traversed in a stride.
pub fn flow_weighted_arousal(graph: &GraphSnapshot, traversals: &[Traversal]) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for traversal in traversals {
        if let Some(link) = graph.link(&traversal.link) {
            weighted += traversal.flow * link.emotion.arousal;
            total += traversal.flow;
        }
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}
