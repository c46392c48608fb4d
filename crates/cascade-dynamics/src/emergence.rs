//! Entity emergence: cluster detection, scoring, and identity tracking.
//!
//! Each tick, complete nodes that are active in their dominant channel are
//! grouped by that channel and split into connected components over
//! excitatory links. Every component is a candidate scored as `S = E * Q`,
//! where `E` is the channel energy held by its members and `Q` blends link
//! density, embedding tightness, and co-activation.
//!
//! The threshold `tau` is `median(S) + k * stdev(S)` over the tick's
//! candidates, floored at a minimum and raised when too many candidates
//! would clear it. Entities persist while `S > persist_ratio * tau`; new
//! ones need `S > emerge_ratio * tau`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use cascade_graph::GraphSnapshot;
use cascade_types::{
    Anomaly, CapacityKind, DissolveReason, EmergentEntity, EntityId, NodeId, TelemetryEvent,
};

use crate::anomaly::AnomalyLog;
use crate::config::{EmergenceConfig, IdentityConflictPolicy};
use crate::math::{cosine, count_f64, mean, median, pearson, variance};

/// Samples needed before co-activation is computed.
const MIN_COACTIVATION_SAMPLES: usize = 3;

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Co-activation history
// ---------------------------------------------------------------------------

/// Ring buffer of recent total energy per node.
#[derive(Debug, Clone, Default)]
pub struct CoactivationHistory {
    capacity: usize,
    samples: BTreeMap<NodeId, VecDeque<f64>>,
}

impl CoactivationHistory {
    /// Create a history keeping `capacity` samples per node.
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: BTreeMap::new(),
        }
    }

    /// Append the current total energy of every node. Nodes no longer in
    /// the graph are forgotten.
    pub fn record(&mut self, graph: &GraphSnapshot) {
        self.samples.retain(|id, _| graph.node(id).is_some());
        for (id, node) in graph.nodes() {
            let series = self.samples.entry(id.clone()).or_default();
            series.push_back(node.total_energy());
            while series.len() > self.capacity.max(1) {
                series.pop_front();
            }
        }
    }

    /// Pearson correlation over the samples both nodes have in common.
    pub fn correlation(&self, a: &NodeId, b: &NodeId) -> Option<f64> {
        let sa = self.samples.get(a)?;
        let sb = self.samples.get(b)?;
        let n = sa.len().min(sb.len());
        if n < MIN_COACTIVATION_SAMPLES {
            return None;
        }
        let tail = |s: &VecDeque<f64>| -> Vec<f64> {
            s.iter().skip(s.len().saturating_sub(n)).copied().collect()
        };
        pearson(&tail(sa), &tail(sb))
    }

    /// Samples held for a node.
    pub fn len_of(&self, node: &NodeId) -> usize {
        self.samples.get(node).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A candidate cluster found this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Channel the cluster is active in.
    pub channel: EntityId,
    /// Member nodes.
    pub members: BTreeSet<NodeId>,
    /// Member holding the most channel energy.
    pub anchor: NodeId,
    /// Channel energy summed over the members.
    pub energy: f64,
    /// Coherence `Q` in `[0, 1]`.
    pub coherence: f64,
    /// Emergence score `S = E * Q`.
    pub score: f64,
}

/// Coherence components of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coherence {
    /// Excitatory links among members over `n * (n - 1)`.
    pub density: f64,
    /// Mean `(cos + 1) / 2` over member embedding pairs.
    pub tightness: f64,
    /// Mean positive correlation over member energy histories.
    pub coactivation: f64,
}

impl Coherence {
    /// Weighted blend of the components.
    pub fn blend(&self, config: &EmergenceConfig) -> f64 {
        let q = config.density_weight * self.density
            + config.tightness_weight * self.tightness
            + config.coactivation_weight * self.coactivation;
        q.max(0.0).min(1.0)
    }
}

/// Measure the coherence of a member set.
pub fn coherence(
    graph: &GraphSnapshot,
    members: &BTreeSet<NodeId>,
    history: &CoactivationHistory,
) -> Coherence {
    let n = members.len();
    let possible = count_f64(n) * count_f64(n.saturating_sub(1));
    let intra = members
        .iter()
        .flat_map(|m| graph.outgoing(m))
        .filter(|l| !l.link_type.is_inhibitory() && members.contains(&l.target))
        .count();
    let density = if possible > 0.0 {
        (count_f64(intra) / possible).min(1.0)
    } else {
        0.0
    };

    let embeddings: Vec<&[f32]> = members
        .iter()
        .filter_map(|m| graph.node(m).and_then(|node| node.embedding.as_deref()))
        .collect();
    let mut similarities = Vec::new();
    for (i, a) in embeddings.iter().enumerate() {
        for b in embeddings.iter().skip(i.saturating_add(1)) {
            if let Some(c) = cosine(a, b) {
                similarities.push((c + 1.0) / 2.0);
            }
        }
    }

    let ids: Vec<&NodeId> = members.iter().collect();
    let mut correlations = Vec::new();
    for (i, a) in ids.iter().enumerate() {
        for b in ids.iter().skip(i.saturating_add(1)) {
            if let Some(r) = history.correlation(a, b) {
                correlations.push(r.max(0.0));
            }
        }
    }

    Coherence {
        density,
        tightness: mean(&similarities),
        coactivation: mean(&correlations),
    }
}

fn components(graph: &GraphSnapshot, pool: &BTreeSet<NodeId>) -> Vec<BTreeSet<NodeId>> {
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    let mut out = Vec::new();
    for start in pool {
        if !seen.insert(start.clone()) {
            continue;
        }
        let mut component = BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            for link in graph
                .outgoing(&node)
                .into_iter()
                .chain(graph.incoming(&node))
            {
                if link.link_type.is_inhibitory() {
                    continue;
                }
                let other = if link.source == node {
                    &link.target
                } else {
                    &link.source
                };
                if pool.contains(other) && seen.insert(other.clone()) {
                    stack.push(other.clone());
                }
            }
            component.insert(node);
        }
        out.push(component);
    }
    out
}

/// Find and score this tick's candidate clusters, strongest first.
pub fn find_candidates(
    graph: &GraphSnapshot,
    default_threshold: f64,
    history: &CoactivationHistory,
    config: &EmergenceConfig,
) -> Vec<Candidate> {
    let mut pools: BTreeMap<EntityId, BTreeSet<NodeId>> = BTreeMap::new();
    for (id, node) in graph.nodes() {
        if !node.complete {
            continue;
        }
        let Some((channel, _)) = node.dominant_channel() else {
            continue;
        };
        if node.is_active_in(channel, default_threshold) {
            pools.entry(channel.clone()).or_default().insert(id.clone());
        }
    }

    let mut candidates = Vec::new();
    for (channel, pool) in pools {
        for members in components(graph, &pool) {
            let mut anchor: Option<(&NodeId, f64)> = None;
            let mut energy = 0.0;
            for id in &members {
                let e = graph.node(id).map_or(0.0, |n| n.energy_in(&channel));
                energy += e;
                if anchor.is_none_or(|(_, best)| e > best) {
                    anchor = Some((id, e));
                }
            }
            let Some(anchor) = anchor.map(|(id, _)| id.clone()) else {
                continue;
            };
            let q = coherence(graph, &members, history).blend(config);
            candidates.push(Candidate {
                channel: channel.clone(),
                members,
                anchor,
                energy,
                coherence: q,
                score: energy * q,
            });
        }
    }
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.anchor.cmp(&b.anchor))
    });
    candidates
}

/// Emergence threshold for a set of candidate scores.
///
/// Below `min_candidates` the floor applies alone. If more than
/// `max_entities` scores would exceed the threshold it is raised to the
/// first score outside the top `max_entities`.
pub fn emergence_threshold(scores: &[f64], config: &EmergenceConfig) -> f64 {
    let mut tau = if scores.len() < config.min_candidates {
        config.min_threshold
    } else {
        config
            .sigma_k
            .mul_add(variance(scores).sqrt(), median(scores))
            .max(config.min_threshold)
    };
    let mut ranked = scores.to_vec();
    ranked.sort_by(|a, b| b.total_cmp(a));
    let above = ranked.iter().filter(|&&s| s > tau).count();
    if above > config.max_entities {
        if let Some(&cut) = ranked.get(config.max_entities) {
            tau = cut;
        }
    }
    tau
}

fn overlap(candidate: &BTreeSet<NodeId>, entity: &BTreeSet<NodeId>) -> f64 {
    if entity.is_empty() {
        return 0.0;
    }
    count_f64(candidate.intersection(entity).count()) / count_f64(entity.len())
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Result of one emergence update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmergenceOutcome {
    /// Lifecycle events in the order they happened.
    pub events: Vec<TelemetryEvent>,
    /// Threshold in force this tick.
    pub threshold: f64,
    /// Candidate clusters considered.
    pub candidates: usize,
}

/// Tracks emergent entities across ticks.
#[derive(Debug, Clone)]
pub struct EntityTracker {
    config: EmergenceConfig,
    history: CoactivationHistory,
    entities: BTreeMap<EntityId, EmergentEntity>,
}

impl EntityTracker {
    /// Create a tracker with no entities.
    pub const fn new(config: EmergenceConfig) -> Self {
        let history = CoactivationHistory::new(config.history_len);
        Self {
            config,
            history,
            entities: BTreeMap::new(),
        }
    }

    /// Active entities keyed by id.
    pub const fn entities(&self) -> &BTreeMap<EntityId, EmergentEntity> {
        &self.entities
    }

    /// Members of every active entity.
    pub fn members_of(&self) -> BTreeMap<EntityId, BTreeSet<NodeId>> {
        self.entities
            .iter()
            .map(|(id, e)| (id.clone(), e.members.clone()))
            .collect()
    }

    /// Nodes belonging to any active entity.
    pub fn claimed_nodes(&self) -> BTreeSet<NodeId> {
        self.entities
            .values()
            .flat_map(|e| e.members.iter().cloned())
            .collect()
    }

    /// Detect clusters and update entity identities for this tick.
    pub fn update(
        &mut self,
        graph: &GraphSnapshot,
        tick: u64,
        default_threshold: f64,
        anomalies: &mut AnomalyLog,
    ) -> EmergenceOutcome {
        self.history.record(graph);
        let candidates = find_candidates(graph, default_threshold, &self.history, &self.config);
        let scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();
        let tau = emergence_threshold(&scores, &self.config);
        let persist_at = self.config.persist_ratio * tau;
        let emerge_at = self.config.emerge_ratio * tau;
        let candidate_count = candidates.len();
        let mut events = Vec::new();

        // Match candidates to entities; one candidate covering several
        // entities merges them into the strongest.
        let mut absorbed: BTreeSet<EntityId> = BTreeSet::new();
        let mut claims: BTreeMap<EntityId, Vec<Candidate>> = BTreeMap::new();
        let mut unmatched: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            let matches: Vec<&EmergentEntity> = self
                .entities
                .values()
                .filter(|e| e.channel == candidate.channel && !absorbed.contains(&e.id))
                .filter(|e| overlap(&candidate.members, &e.members) >= self.config.match_overlap)
                .collect();
            let Some(survivor) = matches
                .iter()
                .max_by(|a, b| a.score.total_cmp(&b.score).then_with(|| b.id.cmp(&a.id)))
                .map(|e| e.id.clone())
            else {
                unmatched.push(candidate);
                continue;
            };
            let others: Vec<EntityId> = matches
                .iter()
                .map(|e| e.id.clone())
                .filter(|id| *id != survivor)
                .collect();
            for other in others {
                if let Some(moved) = claims.remove(&other) {
                    claims.entry(survivor.clone()).or_default().extend(moved);
                }
                tracing::info!(survivor = %survivor, absorbed = %other, tick, "Entities merged");
                events.push(TelemetryEvent::EntityMerged {
                    tick,
                    survivor: survivor.clone(),
                    absorbed: other.clone(),
                });
                events.push(TelemetryEvent::EntityDissolved {
                    tick,
                    entity: other.clone(),
                    reason: DissolveReason::Merged,
                });
                absorbed.insert(other);
            }
            claims.entry(survivor).or_default().push(candidate);
        }
        for id in &absorbed {
            self.entities.remove(id);
        }

        // Resolve claims: the most coherent claimant keeps the identity.
        let mut next: BTreeMap<EntityId, EmergentEntity> = BTreeMap::new();
        let mut offspring: Vec<(EntityId, Candidate)> = Vec::new();
        for (id, mut claimants) in claims {
            let Some(existing) = self.entities.remove(&id) else {
                continue;
            };
            claimants.sort_by(|a, b| {
                b.coherence
                    .total_cmp(&a.coherence)
                    .then_with(|| b.score.total_cmp(&a.score))
                    .then_with(|| a.anchor.cmp(&b.anchor))
            });
            let mut rest = claimants.into_iter();
            let Some(winner) = rest.next() else {
                continue;
            };
            for loser in rest {
                match self.config.identity_conflict {
                    IdentityConflictPolicy::Split => offspring.push((id.clone(), loser)),
                    IdentityConflictPolicy::DeactivateWeaker => {
                        tracing::debug!(entity = %id, anchor = %loser.anchor, "Dropped weaker sub-cluster");
                    }
                }
            }
            if winner.score > persist_at {
                next.insert(
                    id.clone(),
                    EmergentEntity {
                        id,
                        channel: existing.channel,
                        members: winner.members,
                        energy: winner.energy,
                        coherence: winner.coherence,
                        score: winner.score,
                        born_tick: existing.born_tick,
                    },
                );
            } else {
                events.push(TelemetryEvent::EntityDissolved {
                    tick,
                    entity: id,
                    reason: DissolveReason::BelowThreshold,
                });
            }
        }

        for id in std::mem::take(&mut self.entities).into_keys() {
            events.push(TelemetryEvent::EntityDissolved {
                tick,
                entity: id,
                reason: DissolveReason::Vanished,
            });
        }

        for (parent, candidate) in offspring {
            let child = candidate.channel.derive(&candidate.anchor);
            if candidate.score <= emerge_at || next.contains_key(&child) {
                continue;
            }
            events.push(TelemetryEvent::EntitySplit {
                tick,
                entity: parent,
                offspring: child.clone(),
            });
            events.push(emerged(tick, &child, &candidate, tau));
            next.insert(child.clone(), entity_from(child, candidate, tick));
        }

        for candidate in unmatched {
            if candidate.score <= emerge_at {
                continue;
            }
            let id = if next.contains_key(&candidate.channel) {
                candidate.channel.derive(&candidate.anchor)
            } else {
                candidate.channel.clone()
            };
            if next.contains_key(&id) {
                continue;
            }
            events.push(emerged(tick, &id, &candidate, tau));
            next.insert(id.clone(), entity_from(id, candidate, tick));
        }

        if next.len() > self.config.max_entities {
            let mut ranked: Vec<(EntityId, f64)> =
                next.iter().map(|(id, e)| (id.clone(), e.score)).collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (id, _) in ranked.into_iter().skip(self.config.max_entities) {
                next.remove(&id);
                anomalies.record(Anomaly::CapacityExceeded {
                    resource: CapacityKind::ActiveEntities,
                    element: id.to_string(),
                });
                events.push(TelemetryEvent::EntityDissolved {
                    tick,
                    entity: id,
                    reason: DissolveReason::CapExceeded,
                });
            }
        }

        self.entities = next;
        tracing::debug!(
            tick,
            threshold = tau,
            candidates = candidate_count,
            active = self.entities.len(),
            "Emergence update"
        );
        EmergenceOutcome {
            events,
            threshold: tau,
            candidates: candidate_count,
        }
    }
}

fn emerged(tick: u64, id: &EntityId, candidate: &Candidate, tau: f64) -> TelemetryEvent {
    tracing::info!(entity = %id, members = candidate.members.len(), score = candidate.score, tick, "Entity emerged");
    TelemetryEvent::EntityEmerged {
        tick,
        entity: id.clone(),
        members: count_u32(candidate.members.len()),
        score: candidate.score,
        threshold: tau,
    }
}

fn entity_from(id: EntityId, candidate: Candidate, tick: u64) -> EmergentEntity {
    EmergentEntity {
        id,
        channel: candidate.channel,
        members: candidate.members,
        energy: candidate.energy,
        coherence: candidate.coherence,
        score: candidate.score,
        born_tick: tick,
    }
}

#[cfg(test)]
mod tests {
    use cascade_types::{Link, LinkType, Node, NodeType};

    use super::*;

    fn ch(id: &str) -> EntityId {
        EntityId::new(id)
    }

    /// Density-only scoring so `S` equals the members' energy for a
    /// fully linked cluster.
    fn density_only() -> EmergenceConfig {
        EmergenceConfig {
            density_weight: 1.0,
            tightness_weight: 0.0,
            coactivation_weight: 0.0,
            ..EmergenceConfig::default()
        }
    }

    fn node(id: &str, channel: &str, energy: f64) -> Node {
        let mut n = Node::new(id, NodeType::Concept);
        n.set_energy(&ch(channel), energy);
        n
    }

    fn both_ways(a: &str, b: &str) -> Vec<Link> {
        vec![
            Link::new(format!("{a}{b}"), a, b, LinkType::Semantic, 0.5),
            Link::new(format!("{b}{a}"), b, a, LinkType::Semantic, 0.5),
        ]
    }

    fn set(graph: &mut GraphSnapshot, id: &str, channel: &str, energy: f64) {
        if let Some(n) = graph.node_mut(&NodeId::new(id)) {
            n.set_energy(&ch(channel), energy);
        }
    }

    fn names(events: &[TelemetryEvent]) -> Vec<&'static str> {
        events.iter().map(TelemetryEvent::name).collect()
    }

    #[test]
    fn candidates_split_by_channel_and_connectivity() {
        let mut links = both_ways("a", "b");
        links.extend(both_ways("c", "d"));
        let graph = GraphSnapshot::from_parts(
            vec![
                node("a", "e1", 1.0),
                node("b", "e1", 1.0),
                node("c", "e1", 1.0),
                node("d", "e2", 1.0),
                node("z", "e1", 0.01),
            ],
            links,
        )
        .unwrap_or_default();
        let history = CoactivationHistory::new(4);
        let found = find_candidates(&graph, 0.1, &history, &density_only());
        let groups: Vec<(String, usize)> = found
            .iter()
            .map(|c| (c.channel.to_string(), c.members.len()))
            .collect();
        assert_eq!(found.len(), 3);
        assert!(groups.contains(&("e1".to_owned(), 2)));
        assert_eq!(groups.iter().filter(|(_, n)| *n == 1).count(), 2);
        let pair = found.first();
        assert!(pair.is_some_and(|c| (c.score - 2.0).abs() < 1e-12));
    }

    #[test]
    fn coherence_components() {
        let mut a = node("a", "e1", 1.0);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = node("b", "e1", 1.0);
        b.embedding = Some(vec![0.0, 1.0]);
        let graph = GraphSnapshot::from_parts(
            vec![a, b, node("c", "e1", 1.0)],
            vec![
                Link::new("ab", "a", "b", LinkType::Semantic, 0.5),
                Link::new("bc", "b", "c", LinkType::Semantic, 0.5),
                Link::new("ca", "c", "a", LinkType::Inhibitory, -0.5),
            ],
        )
        .unwrap_or_default();
        let members: BTreeSet<NodeId> = ["a", "b", "c"].into_iter().map(NodeId::new).collect();
        let mut history = CoactivationHistory::new(8);
        for _ in 0..2 {
            history.record(&graph);
        }
        let c = coherence(&graph, &members, &history);
        assert!((c.density - 2.0 / 6.0).abs() < 1e-12);
        assert!((c.tightness - 0.5).abs() < 1e-12);
        assert!(c.coactivation.abs() < f64::EPSILON);
    }

    #[test]
    fn coactivation_tracks_shared_history() {
        let mut graph = GraphSnapshot::from_parts(
            vec![node("a", "e1", 1.0), node("b", "e1", 2.0)],
            vec![],
        )
        .unwrap_or_default();
        let mut history = CoactivationHistory::new(4);
        for step in 1..=5 {
            let e = f64::from(step);
            set(&mut graph, "a", "e1", e);
            set(&mut graph, "b", "e1", 2.0 * e);
            history.record(&graph);
        }
        assert_eq!(history.len_of(&NodeId::new("a")), 4);
        let r = history.correlation(&NodeId::new("a"), &NodeId::new("b"));
        assert!(r.is_some_and(|r| (r - 1.0).abs() < 1e-9));
    }

    #[test]
    fn threshold_floor_statistics_and_cap() {
        let config = EmergenceConfig::default();
        assert!((emergence_threshold(&[5.0, 6.0], &config) - 0.5).abs() < f64::EPSILON);

        let flat = [1.0; 6];
        assert!((emergence_threshold(&flat, &config) - 1.0).abs() < f64::EPSILON);

        let capped = EmergenceConfig {
            max_entities: 2,
            min_candidates: 1,
            sigma_k: 0.0,
            min_threshold: 0.1,
            ..EmergenceConfig::default()
        };
        // The median of 7 would let three through; the cut moves to the third score.
        let scores = [10.0, 9.0, 8.0, 7.0, 1.0, 1.0, 1.0];
        let tau = emergence_threshold(&scores, &capped);
        assert!((tau - 8.0).abs() < f64::EPSILON);
        assert_eq!(scores.iter().filter(|&&s| s > tau).count(), 2);
    }

    fn pair_graph(energy: f64) -> GraphSnapshot {
        GraphSnapshot::from_parts(
            vec![node("a", "e1", energy), node("b", "e1", energy)],
            both_ways("a", "b"),
        )
        .unwrap_or_default()
    }

    #[test]
    fn hysteresis_limits_transitions() {
        let mut tracker = EntityTracker::new(density_only());
        let mut log = AnomalyLog::new();

        // S = 2e; tau is the 0.5 floor so emergence needs S > 0.55.
        let mut graph = pair_graph(0.26);
        let outcome = tracker.update(&graph, 0, 0.1, &mut log);
        assert!(outcome.events.is_empty());

        set(&mut graph, "a", "e1", 0.3);
        set(&mut graph, "b", "e1", 0.3);
        let outcome = tracker.update(&graph, 1, 0.1, &mut log);
        assert_eq!(names(&outcome.events), vec!["entity.emerged"]);
        assert!(tracker.entities().contains_key(&ch("e1")));

        let mut transitions = 0;
        for tick in 2..40_u64 {
            let e = if tick % 2 == 0 { 0.24 } else { 0.26 };
            set(&mut graph, "a", "e1", e);
            set(&mut graph, "b", "e1", e);
            transitions += tracker.update(&graph, tick, 0.1, &mut log).events.len();
        }
        assert_eq!(transitions, 0);
        let born = tracker.entities().get(&ch("e1")).map(|e| e.born_tick);
        assert_eq!(born, Some(1));

        set(&mut graph, "a", "e1", 0.2);
        set(&mut graph, "b", "e1", 0.2);
        let outcome = tracker.update(&graph, 40, 0.1, &mut log);
        assert_eq!(
            outcome.events,
            vec![TelemetryEvent::EntityDissolved {
                tick: 40,
                entity: ch("e1"),
                reason: DissolveReason::BelowThreshold,
            }]
        );
    }

    #[test]
    fn inactive_cluster_vanishes() {
        let mut tracker = EntityTracker::new(density_only());
        let mut log = AnomalyLog::new();
        let mut graph = pair_graph(1.0);
        let _ = tracker.update(&graph, 0, 0.1, &mut log);
        set(&mut graph, "a", "e1", 0.0);
        set(&mut graph, "b", "e1", 0.0);
        let outcome = tracker.update(&graph, 1, 0.1, &mut log);
        assert_eq!(
            outcome.events,
            vec![TelemetryEvent::EntityDissolved {
                tick: 1,
                entity: ch("e1"),
                reason: DissolveReason::Vanished,
            }]
        );
        assert!(tracker.entities().is_empty());
    }

    #[test]
    fn second_cluster_in_channel_gets_derived_id() {
        let mut links = both_ways("a", "b");
        links.extend(both_ways("c", "d"));
        let graph = GraphSnapshot::from_parts(
            vec![
                node("a", "e1", 2.0),
                node("b", "e1", 1.0),
                node("c", "e1", 1.0),
                node("d", "e1", 0.9),
            ],
            links,
        )
        .unwrap_or_default();
        let mut tracker = EntityTracker::new(density_only());
        let mut log = AnomalyLog::new();
        let _ = tracker.update(&graph, 0, 0.1, &mut log);
        let ids: Vec<EntityId> = tracker.entities().keys().cloned().collect();
        assert_eq!(ids, vec![ch("e1"), ch("e1:c")]);
    }

    #[test]
    fn bridged_clusters_merge_into_stronger() {
        let mut links = both_ways("a", "b");
        links.extend(both_ways("c", "d"));
        let mut graph = GraphSnapshot::from_parts(
            vec![
                node("a", "e1", 2.0),
                node("b", "e1", 1.0),
                node("c", "e1", 1.0),
                node("d", "e1", 0.9),
            ],
            links,
        )
        .unwrap_or_default();
        let mut tracker = EntityTracker::new(density_only());
        let mut log = AnomalyLog::new();
        let _ = tracker.update(&graph, 0, 0.1, &mut log);

        for link in both_ways("b", "c") {
            let _ = graph.add_link(link);
        }
        let outcome = tracker.update(&graph, 1, 0.1, &mut log);
        assert!(outcome.events.contains(&TelemetryEvent::EntityMerged {
            tick: 1,
            survivor: ch("e1"),
            absorbed: ch("e1:c"),
        }));
        let members = tracker.entities().get(&ch("e1")).map(|e| e.members.len());
        assert_eq!(members, Some(4));
        assert_eq!(tracker.entities().len(), 1);
    }

    fn chain_graph() -> GraphSnapshot {
        let mut links = both_ways("a", "b");
        links.extend(both_ways("b", "c"));
        links.extend(both_ways("c", "d"));
        links.extend(both_ways("a", "c"));
        links.extend(both_ways("b", "d"));
        links.extend(both_ways("a", "d"));
        GraphSnapshot::from_parts(
            vec![
                node("a", "e1", 2.0),
                node("b", "e1", 2.0),
                node("c", "e1", 1.5),
                node("d", "e1", 1.5),
            ],
            links,
        )
        .unwrap_or_default()
    }

    fn sever(graph: &mut GraphSnapshot) {
        for id in ["bc", "cb", "ac", "ca", "bd", "db", "ad", "da"] {
            let _ = graph.remove_link(&cascade_types::LinkId::new(id));
        }
    }

    #[test]
    fn separated_sub_clusters_split() {
        let mut graph = chain_graph();
        let mut tracker = EntityTracker::new(density_only());
        let mut log = AnomalyLog::new();
        let _ = tracker.update(&graph, 0, 0.1, &mut log);
        assert_eq!(tracker.entities().len(), 1);

        sever(&mut graph);
        let outcome = tracker.update(&graph, 1, 0.1, &mut log);
        assert!(outcome.events.contains(&TelemetryEvent::EntitySplit {
            tick: 1,
            entity: ch("e1"),
            offspring: ch("e1:c"),
        }));
        let kept = tracker.entities().get(&ch("e1")).map(|e| e.members.clone());
        let expected: BTreeSet<NodeId> = ["a", "b"].into_iter().map(NodeId::new).collect();
        assert_eq!(kept, Some(expected));
        assert!(tracker.entities().contains_key(&ch("e1:c")));
        // Energy is never touched by identity resolution.
        assert!((graph.total_energy() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn weaker_sub_cluster_can_be_deactivated() {
        let mut graph = chain_graph();
        let config = EmergenceConfig {
            identity_conflict: IdentityConflictPolicy::DeactivateWeaker,
            ..density_only()
        };
        let mut tracker = EntityTracker::new(config);
        let mut log = AnomalyLog::new();
        let _ = tracker.update(&graph, 0, 0.1, &mut log);
        sever(&mut graph);
        let outcome = tracker.update(&graph, 1, 0.1, &mut log);
        assert!(outcome.events.is_empty());
        assert_eq!(tracker.entities().len(), 1);
        assert!((graph.total_energy() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn cap_evicts_lowest_scores() {
        let mut links = both_ways("a", "b");
        links.extend(both_ways("c", "d"));
        let mut graph = GraphSnapshot::from_parts(
            vec![
                node("a", "e1", 1.0),
                node("b", "e1", 1.0),
                node("c", "e2", 0.05),
                node("d", "e2", 0.05),
            ],
            links,
        )
        .unwrap_or_default();
        let config = EmergenceConfig {
            max_entities: 1,
            ..density_only()
        };
        let mut tracker = EntityTracker::new(config);
        let mut log = AnomalyLog::new();
        let _ = tracker.update(&graph, 0, 0.01, &mut log);
        assert!(tracker.entities().contains_key(&ch("e1")));

        set(&mut graph, "c", "e2", 2.0);
        set(&mut graph, "d", "e2", 2.0);
        let outcome = tracker.update(&graph, 1, 0.01, &mut log);
        assert!(outcome.events.contains(&TelemetryEvent::EntityDissolved {
            tick: 1,
            entity: ch("e1"),
            reason: DissolveReason::CapExceeded,
        }));
        let ids: Vec<EntityId> = tracker.entities().keys().cloned().collect();
        assert_eq!(ids, vec![ch("e2")]);
        assert_eq!(log.count_kind("capacity_exceeded"), 1);
    }
}
