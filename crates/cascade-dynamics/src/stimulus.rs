//! Stimulus injection.
//!
//! A stimulus delivers an energy budget to a set of entry nodes. The budget
//! is split across entry nodes according to [`StimulusSplit`] and across
//! entity channels according to the stimulus' normalized entity mix. Entry
//! nodes the graph does not know, or knows only partially, are skipped and
//! reported; their share is redistributed over the usable entries.

use std::collections::{BTreeMap, BTreeSet};

use cascade_graph::GraphSnapshot;
use cascade_types::{Anomaly, EntityId, NodeId, Stimulus, StimulusSplit};

use crate::anomaly::AnomalyLog;
use crate::math::count_f64;

/// What a stimulus actually delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionOutcome {
    /// Total energy added to the graph.
    pub injected: f64,
    /// Energy delivered per entry node.
    pub delivered: BTreeMap<NodeId, f64>,
    /// Entry nodes skipped as unknown or incomplete.
    pub skipped: u32,
    /// Node channels pushed from below to at or above their threshold.
    pub flips: u32,
}

/// Normalize an entity mix into fractions summing to one.
///
/// Non-finite and non-positive shares are dropped. Returns an empty map if
/// nothing positive remains.
pub fn normalize_mix(mix: &BTreeMap<EntityId, f64>) -> BTreeMap<EntityId, f64> {
    let usable: BTreeMap<EntityId, f64> = mix
        .iter()
        .filter(|(_, share)| share.is_finite() && **share > 0.0)
        .map(|(entity, share)| (entity.clone(), *share))
        .collect();
    let total: f64 = usable.values().sum();
    if total <= 0.0 {
        return BTreeMap::new();
    }
    usable
        .into_iter()
        .map(|(entity, share)| (entity, share / total))
        .collect()
}

/// Deliver a stimulus into the graph.
pub fn inject(
    graph: &mut GraphSnapshot,
    stimulus: &Stimulus,
    split: StimulusSplit,
    default_threshold: f64,
    anomalies: &mut AnomalyLog,
) -> InjectionOutcome {
    let mut outcome = InjectionOutcome::default();
    let mix = normalize_mix(&stimulus.entity_mix);
    if mix.is_empty() || !stimulus.energy_budget.is_finite() || stimulus.energy_budget <= 0.0 {
        tracing::debug!(
            budget = stimulus.energy_budget,
            channels = mix.len(),
            "Stimulus carries no deliverable energy"
        );
        return outcome;
    }

    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for id in &stimulus.entry_nodes {
        if !seen.insert(id.clone()) {
            continue;
        }
        match graph.node(id) {
            Some(node) if node.complete => entries.push(id.clone()),
            Some(_) => {
                outcome.skipped = outcome.skipped.saturating_add(1);
                anomalies.record(Anomaly::DataIncomplete {
                    element: id.to_string(),
                    detail: "stimulus entry node is still loading".into(),
                });
            }
            None => {
                outcome.skipped = outcome.skipped.saturating_add(1);
                anomalies.record(Anomaly::DataIncomplete {
                    element: id.to_string(),
                    detail: "stimulus entry node is unknown".into(),
                });
            }
        }
    }
    if entries.is_empty() {
        return outcome;
    }

    let shares = entry_shares(graph, &entries, &mix, split, default_threshold);
    for (id, share) in entries.iter().zip(shares) {
        let Some(node) = graph.node_mut(id) else {
            continue;
        };
        let node_energy = stimulus.energy_budget * share;
        for (entity, fraction) in &mix {
            let before = node.energy_in(entity);
            let threshold = node.threshold_for(entity, default_threshold);
            let after = before + node_energy * fraction;
            node.set_energy(entity, after);
            if before < threshold && after >= threshold {
                outcome.flips = outcome.flips.saturating_add(1);
            }
        }
        if node_energy > 0.0 {
            outcome.delivered.insert(id.clone(), node_energy);
            outcome.injected += node_energy;
        }
    }
    outcome
}

/// Fraction of the budget each entry receives, in entry order.
fn entry_shares(
    graph: &GraphSnapshot,
    entries: &[NodeId],
    mix: &BTreeMap<EntityId, f64>,
    split: StimulusSplit,
    default_threshold: f64,
) -> Vec<f64> {
    let uniform = || {
        let n = count_f64(entries.len().max(1));
        vec![1.0 / n; entries.len()]
    };
    match split {
        StimulusSplit::Uniform => uniform(),
        StimulusSplit::ThresholdGap => {
            let gaps: Vec<f64> = entries
                .iter()
                .map(|id| {
                    graph.node(id).map_or(0.0, |node| {
                        mix.iter()
                            .map(|(entity, fraction)| {
                                let gap = node.threshold_for(entity, default_threshold)
                                    - node.energy_in(entity);
                                fraction * gap.max(0.0)
                            })
                            .sum()
                    })
                })
                .collect();
            let total: f64 = gaps.iter().sum();
            if total > 0.0 {
                gaps.into_iter().map(|gap| gap / total).collect()
            } else {
                uniform()
            }
        }
    }
}
