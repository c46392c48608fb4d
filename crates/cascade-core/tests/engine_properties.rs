//! Whole-engine properties: bounded energy, conservation under diffusion,
//! gated learning, criticality convergence, and workspace determinism.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing
)]

use std::collections::BTreeMap;

use cascade_core::{Engine, TickResult};
use cascade_dynamics::{DiffusionConfig, DynamicsConfig, LinkTypeParams, TransitionRule, diffuse};
use cascade_graph::GraphSnapshot;
use cascade_types::{EntityId, Link, LinkId, LinkType, Node, NodeId, NodeType, TelemetryEvent};
use proptest::prelude::*;

fn channel() -> EntityId {
    EntityId::new("e1")
}

fn mix() -> BTreeMap<EntityId, f64> {
    BTreeMap::from([(channel(), 1.0)])
}

fn node(id: &str, energy: f64) -> Node {
    let mut node = Node::new(id, NodeType::Concept);
    node.set_energy(&channel(), energy);
    node
}

fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|n| NodeId::new(*n)).collect()
}

/// Every ordered pair of distinct nodes linked at `weight`.
fn complete_graph(names: &[&str], weight: f64) -> GraphSnapshot {
    let mut graph = GraphSnapshot::new();
    for name in names {
        graph.add_node(node(name, 1.0)).unwrap();
    }
    for source in names {
        for target in names {
            if source != target {
                let id = format!("{source}{target}");
                graph
                    .add_link(Link::new(id, *source, *target, LinkType::Semantic, weight))
                    .unwrap();
            }
        }
    }
    graph
}

fn ring_graph(names: &[&str]) -> GraphSnapshot {
    let mut graph = GraphSnapshot::new();
    for name in names {
        graph.add_node(node(name, 1.0)).unwrap();
    }
    let targets = names.iter().cycle().skip(1);
    for (source, target) in names.iter().zip(targets) {
        graph
            .add_link(Link::new(format!("{source}{target}"), *source, *target, LinkType::Semantic, 1.0))
            .unwrap();
    }
    graph
}

fn mixed_graph() -> GraphSnapshot {
    let mut graph = GraphSnapshot::new();
    for name in ["a", "b", "c", "d"] {
        graph.add_node(Node::new(name, NodeType::Concept)).unwrap();
    }
    let links = [
        ("ab", "a", "b", LinkType::Semantic, 0.8),
        ("ac", "a", "c", LinkType::Causal, 0.6),
        ("bd", "b", "d", LinkType::Semantic, 0.5),
        ("cd", "c", "d", LinkType::Task, 0.7),
        ("da", "d", "a", LinkType::Episodic, 0.4),
        ("db", "d", "b", LinkType::Inhibitory, -0.3),
    ];
    for (id, source, target, link_type, weight) in links {
        graph
            .add_link(Link::new(id, source, target, link_type, weight))
            .unwrap();
    }
    graph
}

/// Plasticity that leaves weights untouched, so only the controller moves.
fn frozen_weights(mut config: DynamicsConfig) -> DynamicsConfig {
    config.plasticity.learning_rate = 0.0;
    config.plasticity.reinforcement_rate = 0.0;
    for params in config.plasticity.link_types.values_mut() {
        params.weight_decay = 0.0;
    }
    config
}

fn no_weight_decay(mut config: DynamicsConfig) -> DynamicsConfig {
    config.plasticity.link_types.insert(
        LinkType::Semantic,
        LinkTypeParams {
            w_min: 0.0,
            w_max: 1.0,
            weight_decay: 0.0,
        },
    );
    config
}

fn weight_counts(result: &TickResult) -> (u32, u32) {
    result
        .events
        .iter()
        .find_map(|event| match event {
            TelemetryEvent::WeightsUpdated { updated, gated, .. } => Some((*updated, *gated)),
            _ => None,
        })
        .unwrap_or((0, 0))
}

fn assert_bounded(graph: &GraphSnapshot, e_max: f64) {
    for (id, node) in graph.nodes() {
        for (entity, &value) in &node.energy {
            assert!(value.is_finite(), "{id}/{entity} is not finite");
            assert!(value >= 0.0, "{id}/{entity} is negative: {value}");
            assert!(value < e_max, "{id}/{entity} reached the ceiling: {value}");
        }
    }
}

// ============================================================================
// Bounded energy
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn energy_stays_bounded_for_any_step_sequence(
        steps in proptest::collection::vec((0.0_f64..5000.0, 0.0_f64..50.0), 1..40),
    ) {
        let mut engine = Engine::new(mixed_graph(), DynamicsConfig::default()).unwrap();
        let e_max = engine.state().config.diffusion.e_max;
        for (dt, budget) in steps {
            engine.inject_stimulus(budget, ids(&["a", "c"]), mix());
            let result = engine.tick_with_dt(dt).unwrap();
            prop_assert!(result.dt >= 0.0);
            assert_bounded(engine.graph(), e_max);
            prop_assert!(engine.global_state().total_energy.is_finite());
        }
    }
}

#[test]
fn extreme_steps_stay_bounded() {
    for dt in [3600.0, 0.01] {
        let mut engine = Engine::new(mixed_graph(), DynamicsConfig::default()).unwrap();
        let e_max = engine.state().config.diffusion.e_max;
        for _ in 0..20 {
            engine.inject_stimulus(40.0, ids(&["a"]), mix());
            engine.tick_with_dt(dt).unwrap();
            assert_bounded(engine.graph(), e_max);
        }
    }
}

#[test]
fn huge_stimuli_stay_below_ceiling() {
    for budget in [1e3, 1e6, 1e12] {
        let mut engine = Engine::new(mixed_graph(), DynamicsConfig::default()).unwrap();
        let e_max = engine.state().config.diffusion.e_max;
        for dt in [0.01, 1.0, 3600.0] {
            engine.inject_stimulus(budget, ids(&["a"]), mix());
            engine.tick_with_dt(dt).unwrap();
            assert_bounded(engine.graph(), e_max);
        }
    }
}

#[test]
fn invalid_steps_do_not_corrupt_state() {
    let mut engine = Engine::new(mixed_graph(), DynamicsConfig::default()).unwrap();
    engine.inject_stimulus(5.0, ids(&["a"]), mix());
    engine.tick_with_dt(1.0).unwrap();
    for dt in [f64::NAN, -1.0, f64::INFINITY] {
        let result = engine.tick_with_dt(dt).unwrap();
        assert!(result.dt.abs() < f64::EPSILON);
        assert!(!result.anomalies.is_empty());
    }
    assert_bounded(engine.graph(), engine.state().config.diffusion.e_max);
}

// ============================================================================
// Conservation
// ============================================================================

proptest! {
    #[test]
    fn diffusion_alone_conserves_energy(
        energies in proptest::collection::vec(0.0_f64..9.0, 4),
        alpha0 in 0.0_f64..1.0,
        dt in 0.0_f64..10.0,
    ) {
        let mut graph = mixed_graph();
        for (name, energy) in ["a", "b", "c", "d"].iter().zip(&energies) {
            graph
                .node_mut(&NodeId::new(*name))
                .unwrap()
                .set_energy(&channel(), *energy);
        }
        let before = graph.total_energy();
        let config = DiffusionConfig::default();
        let _ = diffuse(&mut graph, alpha0, dt, &config, &TransitionRule::WeightProportional);
        prop_assert!((graph.total_energy() - before).abs() < 1e-9);
        for (_, node) in graph.nodes() {
            prop_assert!(node.energy.values().all(|e| *e >= 0.0));
        }
    }
}

#[test]
fn valence_bias_also_conserves_energy() {
    let mut graph = mixed_graph();
    graph
        .node_mut(&NodeId::new("a"))
        .unwrap()
        .set_energy(&channel(), 6.0);
    graph
        .link_mut(&LinkId::new("ac"))
        .unwrap()
        .valence
        .insert(channel(), 2.0);
    let before = graph.total_energy();
    let rule = TransitionRule::ValenceBiased { bias: 0.5 };
    let outcome = diffuse(&mut graph, 0.3, 1.0, &DiffusionConfig::default(), &rule);
    assert!(outcome.total_flow > 0.0);
    assert!((graph.total_energy() - before).abs() < 1e-9);
}

// ============================================================================
// Fan-out scenario
// ============================================================================

#[test]
fn fan_out_splits_stimulus_by_weight() {
    let mut graph = GraphSnapshot::new();
    for name in ["a", "b", "c"] {
        graph.add_node(Node::new(name, NodeType::Concept)).unwrap();
    }
    graph
        .add_link(Link::new("ab", "a", "b", LinkType::Semantic, 0.8))
        .unwrap();
    graph
        .add_link(Link::new("ac", "a", "c", LinkType::Semantic, 0.6))
        .unwrap();
    let mut config = DynamicsConfig::default();
    config.diffusion.alpha0 = 0.3;
    config.diffusion.e_max = 1e6;
    config.criticality.enabled = false;

    let mut engine = Engine::new(graph, config).unwrap();
    engine.inject_stimulus(10.0, ids(&["a"]), mix());
    engine.tick_with_dt(1.0).unwrap();

    let energy = |name: &str| {
        engine
            .graph()
            .node(&NodeId::new(name))
            .map_or(0.0, |n| n.energy_in(&channel()))
    };
    let (a, b, c) = (energy("a"), energy("b"), energy("c"));
    assert!(a > b && b > c && c > 0.0);
    assert!((b / c - 0.8 / 0.6).abs() < 1e-9);
    assert!((a / (b + c) - 0.7 / 0.3).abs() < 1e-9);
    assert!(a + b + c < 10.0);
}

// ============================================================================
// Gated learning
// ============================================================================

#[test]
fn active_endpoints_never_learn() {
    let mut graph = GraphSnapshot::new();
    graph.add_node(node("a", 5.0)).unwrap();
    graph.add_node(node("b", 5.0)).unwrap();
    graph
        .add_link(Link::new("ab", "a", "b", LinkType::Semantic, 0.5))
        .unwrap();
    let mut config = no_weight_decay(DynamicsConfig::default());
    config.criticality.enabled = false;

    let mut engine = Engine::new(graph, config).unwrap();
    let mut gated = 0_u32;
    for _ in 0..1000 {
        engine.inject_stimulus(1.0, ids(&["a", "b"]), mix());
        let result = engine.tick_with_dt(1.0).unwrap();
        let (updated, skipped) = weight_counts(&result);
        assert_eq!(updated, 0);
        gated = gated.saturating_add(skipped);
    }
    assert_eq!(gated, 1000);
    let weight = engine.graph().link(&LinkId::new("ab")).unwrap().weight;
    assert!((weight - 0.5).abs() < f64::EPSILON);
}

#[test]
fn inactive_endpoints_learn_a_bounded_step() {
    let mut graph = GraphSnapshot::new();
    graph.add_node(node("a", 0.5)).unwrap();
    graph.add_node(Node::new("b", NodeType::Concept)).unwrap();
    graph
        .add_link(Link::new("ab", "a", "b", LinkType::Semantic, 0.5))
        .unwrap();
    let mut config = no_weight_decay(DynamicsConfig::default());
    config.criticality.enabled = false;

    let mut engine = Engine::new(graph, config).unwrap();
    let result = engine.tick_with_dt(1.0).unwrap();
    assert_eq!(weight_counts(&result), (1, 0));

    // flow = 0.1 * 0.5, post = flow, delta = eta * post^2 * (1 - w)
    let delta = engine.graph().link(&LinkId::new("ab")).unwrap().weight - 0.5;
    assert!(delta > 0.0);
    assert!((delta - 0.05 * 0.0025 * 0.5).abs() < 1e-12);
}

// ============================================================================
// Criticality convergence
// ============================================================================

fn run_with_periodic_stimuli(engine: &mut Engine, names: &[&str], ticks: usize) -> Vec<f64> {
    let mut rhos = Vec::with_capacity(ticks);
    for _ in 0..ticks {
        engine.inject_stimulus(1.0, ids(names), mix());
        engine.tick_with_dt(1.0).unwrap();
        rhos.push(engine.get_criticality_state().global_rho);
    }
    rhos
}

#[test]
fn supercritical_graph_is_pulled_to_unit_radius() {
    let names = ["a", "b", "c", "d"];
    let mut config = frozen_weights(DynamicsConfig::default());
    config.diffusion.alpha0 = 0.25;
    config.decay.delta_state = 0.0005;

    let mut engine = Engine::new(complete_graph(&names, 1.0), config).unwrap();
    let rhos = run_with_periodic_stimuli(&mut engine, &names, 200);
    assert!(rhos[0] > 1.4);
    for (tick, rho) in rhos.iter().enumerate().skip(100) {
        assert!((0.95..=1.05).contains(rho), "tick {tick}: rho {rho}");
    }
}

#[test]
fn subcritical_graph_is_pushed_to_unit_radius() {
    let names = ["a", "b", "c", "d"];
    let mut config = frozen_weights(DynamicsConfig::default());
    config.diffusion.alpha0 = 0.25;
    config.decay.delta_state = core::f64::consts::LN_2;

    let mut engine = Engine::new(ring_graph(&names), config).unwrap();
    let rhos = run_with_periodic_stimuli(&mut engine, &names, 200);
    assert!(rhos[0] < 0.55);
    for (tick, rho) in rhos.iter().enumerate().skip(100) {
        assert!((0.95..=1.05).contains(rho), "tick {tick}: rho {rho}");
    }
}

// ============================================================================
// Workspace
// ============================================================================

fn scripted_run() -> Engine {
    let mut engine = Engine::new(mixed_graph(), DynamicsConfig::default()).unwrap();
    for step in 0..30_u32 {
        if step.checked_rem(5) == Some(0) {
            engine.inject_stimulus(8.0, ids(&["a", "d"]), mix());
        }
        engine.tick_with_dt(0.5).unwrap();
    }
    engine
}

#[test]
fn identical_runs_select_identical_workspaces() {
    let first = scripted_run();
    let second = scripted_run();
    assert_eq!(first.get_workspace(), second.get_workspace());
    assert_eq!(
        first.get_criticality_state().global_rho.to_bits(),
        second.get_criticality_state().global_rho.to_bits()
    );
}

#[test]
fn workspace_respects_capacity() {
    let mut config = DynamicsConfig::default();
    config.workspace.capacity = 2.0;
    let mut engine = Engine::new(mixed_graph(), config).unwrap();
    for _ in 0..10 {
        engine.inject_stimulus(20.0, ids(&["a", "b", "c", "d"]), mix());
        let selection = engine.tick().unwrap();
        assert!(selection.capacity_used <= selection.capacity_budget + 1e-9);
    }
}
