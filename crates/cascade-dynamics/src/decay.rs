//! State decay, inhibition, saturation, and numerical sanitizing.
//!
//! After each diffusion stride every channel of every node decays by
//! `exp(-delta_state * m(type) * dt)`, where `m` is the node-type
//! multiplier. Inhibitory links then suppress their targets in proportion
//! to how loaded their source is. Saturation bounds each channel smoothly
//! with `e_max * tanh(e / e_max)`, and a final sweep replaces any non-finite
//! or negative value with zero.

use std::collections::BTreeMap;

use cascade_graph::GraphSnapshot;
use cascade_types::{Anomaly, EntityId, NodeId};

use crate::anomaly::AnomalyLog;
use crate::config::DecayConfig;

/// Summary of the decay stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecayOutcome {
    /// Energy removed by state decay.
    pub decayed: f64,
    /// Energy removed by inhibition.
    pub inhibited: f64,
    /// Energy removed by saturation.
    pub saturated: f64,
    /// Channel values reset by sanitizing.
    pub sanitized: u32,
}

/// Apply exponential state decay to every node and channel.
pub fn apply_state_decay(
    graph: &mut GraphSnapshot,
    delta_state: f64,
    dt: f64,
    config: &DecayConfig,
) -> f64 {
    let mut removed = 0.0;
    for (_, node) in graph.nodes_mut() {
        let factor = (-delta_state * config.multiplier(node.node_type) * dt).exp();
        for value in node.energy.values_mut() {
            let next = *value * factor;
            removed += *value - next;
            *value = next;
        }
    }
    removed
}

/// Suppress the targets of inhibitory links.
///
/// Each traversable inhibitory link multiplies its target's channel energy
/// by `exp(-|w| * gain * (e_source / e_max) * dt)`, using source energies
/// from before this stage.
pub fn apply_inhibition(graph: &mut GraphSnapshot, dt: f64, e_max: f64, gain: f64) -> f64 {
    let mut exponents: BTreeMap<(NodeId, EntityId), f64> = BTreeMap::new();
    for (_, link) in graph.links() {
        if !link.link_type.is_inhibitory() || !graph.is_traversable(link) {
            continue;
        }
        let Some(source) = graph.node(&link.source) else {
            continue;
        };
        for (entity, energy) in &source.energy {
            let load = (energy / e_max).min(1.0);
            *exponents
                .entry((link.target.clone(), entity.clone()))
                .or_insert(0.0) += link.weight.abs() * gain * load * dt;
        }
    }

    let mut removed = 0.0;
    for ((node_id, entity), exponent) in exponents {
        if let Some(node) = graph.node_mut(&node_id) {
            let before = node.energy_in(&entity);
            let after = before * (-exponent).exp();
            removed += before - after;
            node.set_energy(&entity, after);
        }
    }
    removed
}

/// Bound every channel by `e_max * tanh(e / e_max)`.
///
/// `tanh` rounds to exactly 1 for large arguments, so the result is also
/// held one relative epsilon under `e_max` to keep the bound strict.
pub fn apply_saturation(graph: &mut GraphSnapshot, e_max: f64) -> f64 {
    let ceiling = e_max * (1.0 - f64::EPSILON);
    let mut removed = 0.0;
    for (_, node) in graph.nodes_mut() {
        for value in node.energy.values_mut() {
            let bounded = (e_max * (*value / e_max).tanh()).min(ceiling);
            if value.is_finite() && bounded.is_finite() {
                removed += *value - bounded;
            }
            *value = bounded;
        }
    }
    removed
}

/// Replace non-finite or negative channel values with zero.
pub fn sanitize(graph: &mut GraphSnapshot, anomalies: &mut AnomalyLog) -> u32 {
    let mut reset = 0_u32;
    for (node_id, node) in graph.nodes_mut() {
        let bad: Vec<(EntityId, f64)> = node
            .energy
            .iter()
            .filter(|(_, value)| !value.is_finite() || **value < 0.0)
            .map(|(entity, value)| (entity.clone(), *value))
            .collect();
        for (entity, value) in bad {
            node.energy.remove(&entity);
            reset = reset.saturating_add(1);
            anomalies.record(Anomaly::NumericalAnomaly {
                node: node_id.clone(),
                entity,
                value: value.to_string(),
            });
        }
        node.energy.retain(|_, value| *value > 0.0);
    }
    reset
}

/// Run the whole stage: decay, inhibition, saturation, sanitizing.
pub fn decay_stage(
    graph: &mut GraphSnapshot,
    delta_state: f64,
    dt: f64,
    e_max: f64,
    config: &DecayConfig,
    anomalies: &mut AnomalyLog,
) -> DecayOutcome {
    let decayed = apply_state_decay(graph, delta_state, dt, config);
    let inhibited = apply_inhibition(graph, dt, e_max, config.inhibition_gain);
    let saturated = apply_saturation(graph, e_max);
    let sanitized = sanitize(graph, anomalies);
    DecayOutcome {
        decayed,
        inhibited,
        saturated,
        sanitized,
    }
}

#[cfg(test)]
mod tests {
    use cascade_types::{Link, LinkType, Node, NodeType};
    use proptest::prelude::*;

    use super::*;

    fn channel() -> EntityId {
        EntityId::new("e1")
    }

    fn single(node_type: NodeType, energy: f64) -> GraphSnapshot {
        let mut node = Node::new("n", node_type);
        node.set_energy(&channel(), energy);
        GraphSnapshot::from_parts(vec![node], vec![]).unwrap_or_default()
    }

    fn energy(graph: &GraphSnapshot, id: &str) -> f64 {
        graph
            .node(&NodeId::new(id))
            .map_or(0.0, |n| n.energy_in(&channel()))
    }

    #[test]
    fn decay_is_exponential_in_dt() {
        let config = DecayConfig::default();
        let mut graph = single(NodeType::Concept, 2.0);
        let removed = apply_state_decay(&mut graph, 0.1, 2.0, &config);
        let expected = 2.0 * (-0.2_f64).exp();
        assert!((energy(&graph, "n") - expected).abs() < 1e-12);
        assert!((removed - (2.0 - expected)).abs() < 1e-12);
    }

    #[test]
    fn node_type_scales_decay() {
        let config = DecayConfig::default();
        let mut memory = single(NodeType::Memory, 1.0);
        let mut task = single(NodeType::Task, 1.0);
        let _ = apply_state_decay(&mut memory, 0.1, 1.0, &config);
        let _ = apply_state_decay(&mut task, 0.1, 1.0, &config);
        assert!(energy(&memory, "n") > energy(&task, "n"));
    }

    #[test]
    fn inhibition_suppresses_target_only() {
        let mut src = Node::new("s", NodeType::Concept);
        src.set_energy(&channel(), 5.0);
        let mut dst = Node::new("t", NodeType::Concept);
        dst.set_energy(&channel(), 1.0);
        let mut graph = GraphSnapshot::from_parts(
            vec![src, dst],
            vec![Link::new("st", "s", "t", LinkType::Inhibitory, -0.8)],
        )
        .unwrap_or_default();
        let removed = apply_inhibition(&mut graph, 1.0, 10.0, 1.0);
        let expected = (-0.8_f64 * 0.5).exp();
        assert!((energy(&graph, "t") - expected).abs() < 1e-12);
        assert!((energy(&graph, "s") - 5.0).abs() < f64::EPSILON);
        assert!(removed > 0.0);
    }

    #[test]
    fn saturation_bounds_energy() {
        let mut graph = single(NodeType::Concept, 1000.0);
        let _ = apply_saturation(&mut graph, 10.0);
        let e = energy(&graph, "n");
        assert!(e < 10.0);
        assert!(e > 9.99);
    }

    #[test]
    fn saturation_stays_strictly_below_ceiling() {
        for start in [1e3, 1e6, 1e300, f64::MAX] {
            let mut graph = single(NodeType::Concept, start);
            let _ = apply_saturation(&mut graph, 10.0);
            let e = energy(&graph, "n");
            assert!(e < 10.0, "{start} saturated to {e}");
            assert!(e > 9.99);
        }
    }

    #[test]
    fn sanitize_resets_nan_and_negative() {
        let mut graph = single(NodeType::Concept, 1.0);
        if let Some(node) = graph.node_mut(&NodeId::new("n")) {
            node.energy.insert(channel(), f64::NAN);
            node.energy.insert(EntityId::new("e2"), -1.0);
        }
        let mut log = AnomalyLog::new();
        let reset = sanitize(&mut graph, &mut log);
        assert_eq!(reset, 2);
        assert_eq!(log.count_kind("numerical_anomaly"), 2);
        assert!(graph.total_energy().abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn stage_keeps_energy_bounded(e in 0.0_f64..1e6, dt in 0.0_f64..50.0, delta in 0.0005_f64..2.0) {
            let config = DecayConfig::default();
            let mut graph = single(NodeType::Percept, e);
            let mut log = AnomalyLog::new();
            let _ = decay_stage(&mut graph, delta, dt, 10.0, &config, &mut log);
            let after = energy(&graph, "n");
            prop_assert!(after >= 0.0);
            prop_assert!(after <= 10.0);
            prop_assert!(after <= e + 1e-9);
            prop_assert!(log.is_empty());
        }
    }
}
