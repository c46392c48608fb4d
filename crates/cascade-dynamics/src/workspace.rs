//! Workspace selection.
//!
//! Candidates are active emergent entities plus active nodes that belong to
//! no entity. Each is scored as energy per unit cost, scaled by
//! `exp(z)` where `z` is its log-weight standardized within its own kind.
//! Near-identical candidates fold into the higher-scored one, then the
//! ranked list is packed greedily into the capacity budget. Nothing from
//! the previous selection carries over.

use std::collections::{BTreeMap, BTreeSet};

use cascade_graph::GraphSnapshot;
use cascade_types::{
    EmergentEntity, EntityId, NodeId, WorkspaceEntry, WorkspaceItem, WorkspaceSelection,
};

use crate::config::WorkspaceConfig;
use crate::math::{cosine, count_f64, jaccard, mean, variance};

/// Slack allowed when checking the capacity budget.
const CAPACITY_SLACK: f64 = 1e-9;

/// A scored workspace candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceCandidate {
    /// The node or entity.
    pub item: WorkspaceItem,
    /// Energy carried.
    pub energy: f64,
    /// Capacity charged, never below the configured minimum.
    pub cost: f64,
    /// Log of the structural plus learned weight.
    pub log_weight: f64,
    /// Embedding used for duplicate detection.
    pub embedding: Option<Vec<f32>>,
    /// Nodes the candidate covers, for duplicate detection.
    pub footprint: BTreeSet<NodeId>,
    /// Selection score.
    pub score: f64,
}

impl WorkspaceCandidate {
    const fn is_entity(&self) -> bool {
        matches!(self.item, WorkspaceItem::Entity(_))
    }

    /// Structural and embedding similarity to another candidate.
    ///
    /// The embedding half counts as zero unless both sides carry one, so
    /// footprint overlap alone never marks a duplicate.
    pub fn similarity(&self, other: &Self) -> f64 {
        let structural = jaccard(&self.footprint, &other.footprint);
        let semantic = match (&self.embedding, &other.embedding) {
            (Some(a), Some(b)) => cosine(a, b).unwrap_or(0.0).max(0.0),
            _ => 0.0,
        };
        0.5 * structural + 0.5 * semantic
    }
}

fn mean_embedding<'a>(embeddings: impl Iterator<Item = &'a [f32]>) -> Option<Vec<f32>> {
    let mut sum: Option<Vec<f32>> = None;
    let mut count = 0_u16;
    for embedding in embeddings {
        match sum.as_mut() {
            None => sum = Some(embedding.to_vec()),
            Some(acc) if acc.len() == embedding.len() => {
                for (slot, &x) in acc.iter_mut().zip(embedding) {
                    *slot += x;
                }
            }
            Some(_) => continue,
        }
        count = count.saturating_add(1);
    }
    let n = f32::from(count.max(1));
    sum.map(|acc| acc.into_iter().map(|x| x / n).collect())
}

/// Collect unscored candidates from the graph and the active entities.
pub fn gather(
    graph: &GraphSnapshot,
    entities: &BTreeMap<EntityId, EmergentEntity>,
    default_threshold: f64,
    config: &WorkspaceConfig,
) -> Vec<WorkspaceCandidate> {
    let mut out = Vec::new();
    let mut claimed: BTreeSet<&NodeId> = BTreeSet::new();

    for (id, entity) in entities {
        let members: Vec<_> = entity
            .members
            .iter()
            .filter_map(|m| graph.node(m))
            .collect();
        claimed.extend(entity.members.iter());
        if members.is_empty() {
            continue;
        }
        let cost: f64 = members.iter().map(|n| n.cost).sum();
        let weights: Vec<f64> = members.iter().map(|n| n.log_weight()).collect();
        out.push(WorkspaceCandidate {
            item: WorkspaceItem::Entity(id.clone()),
            energy: entity.energy,
            cost: cost.max(config.min_cost),
            log_weight: mean(&weights),
            embedding: mean_embedding(members.iter().filter_map(|n| n.embedding.as_deref())),
            footprint: entity.members.clone(),
            score: 0.0,
        });
    }

    for (id, node) in graph.nodes() {
        if !node.complete || claimed.contains(id) {
            continue;
        }
        let active = node
            .energy
            .keys()
            .any(|entity| node.is_active_in(entity, default_threshold));
        if !active {
            continue;
        }
        let mut footprint = graph.neighbors(id);
        footprint.insert(id.clone());
        out.push(WorkspaceCandidate {
            item: WorkspaceItem::Node(id.clone()),
            energy: node.total_energy(),
            cost: node.cost.max(config.min_cost),
            log_weight: node.log_weight(),
            embedding: node.embedding.clone(),
            footprint,
            score: 0.0,
        });
    }
    out
}

/// Score candidates in place: energy per cost times `exp(z)`, with `z`
/// standardized within each kind.
pub fn score(candidates: &mut [WorkspaceCandidate], config: &WorkspaceConfig) {
    for entity_kind in [false, true] {
        let weights: Vec<f64> = candidates
            .iter()
            .filter(|c| c.is_entity() == entity_kind)
            .map(|c| c.log_weight)
            .collect();
        let mu = mean(&weights);
        let sigma = variance(&weights).sqrt();
        for candidate in candidates.iter_mut().filter(|c| c.is_entity() == entity_kind) {
            let z = if sigma > f64::EPSILON {
                ((candidate.log_weight - mu) / sigma)
                    .max(-config.z_clamp)
                    .min(config.z_clamp)
            } else {
                0.0
            };
            candidate.score = candidate.energy / candidate.cost * z.exp();
        }
    }
}

/// Choose the workspace for this tick.
pub fn select(
    graph: &GraphSnapshot,
    entities: &BTreeMap<EntityId, EmergentEntity>,
    tick: u64,
    default_threshold: f64,
    config: &WorkspaceConfig,
) -> WorkspaceSelection {
    let mut candidates = gather(graph, entities, default_threshold, config);
    score(&mut candidates, config);
    candidates.retain(|c| c.score.is_finite());
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.item.cmp(&b.item)));

    let mut canonical: Vec<WorkspaceCandidate> = Vec::new();
    let mut deduplicated = 0_u32;
    for candidate in candidates {
        let duplicate = canonical.iter().any(|kept| {
            kept.is_entity() == candidate.is_entity()
                && kept.similarity(&candidate) >= config.duplicate_similarity
        });
        if duplicate {
            deduplicated = deduplicated.saturating_add(1);
        } else {
            canonical.push(candidate);
        }
    }

    let mut selection = WorkspaceSelection {
        tick,
        capacity_budget: config.capacity,
        deduplicated,
        ..WorkspaceSelection::default()
    };
    for candidate in canonical {
        if selection.capacity_used + candidate.cost > config.capacity + CAPACITY_SLACK {
            selection.truncated = selection.truncated.saturating_add(1);
            continue;
        }
        selection.capacity_used += candidate.cost;
        selection.entries.push(WorkspaceEntry {
            item: candidate.item,
            score: candidate.score,
            energy: candidate.energy,
            cost: candidate.cost,
        });
    }
    tracing::debug!(
        tick,
        selected = selection.entries.len(),
        truncated = selection.truncated,
        deduplicated = selection.deduplicated,
        used = selection.capacity_used,
        mean_score = mean_score(&selection),
        "Workspace selected"
    );
    selection
}

fn mean_score(selection: &WorkspaceSelection) -> f64 {
    if selection.entries.is_empty() {
        return 0.0;
    }
    selection.entries.iter().map(|e| e.score).sum::<f64>() / count_f64(selection.entries.len())
}

#[cfg(test)]
mod tests {
    use cascade_types::{Link, LinkType, Node, NodeType};

    use super::*;

    fn ch() -> EntityId {
        EntityId::new("e1")
    }

    fn node(id: &str, energy: f64, cost: f64) -> Node {
        let mut n = Node::new(id, NodeType::Concept);
        n.set_energy(&ch(), energy);
        n.cost = cost;
        n
    }

    fn graph(nodes: Vec<Node>, links: Vec<Link>) -> GraphSnapshot {
        GraphSnapshot::from_parts(nodes, links).unwrap_or_default()
    }

    fn config(capacity: f64) -> WorkspaceConfig {
        WorkspaceConfig {
            capacity,
            ..WorkspaceConfig::default()
        }
    }

    fn items(selection: &WorkspaceSelection) -> Vec<WorkspaceItem> {
        selection.entries.iter().map(|e| e.item.clone()).collect()
    }

    #[test]
    fn score_is_energy_per_cost_with_equal_weights() {
        let g = graph(vec![node("a", 4.0, 2.0), node("b", 3.0, 1.0)], vec![]);
        let selection = select(&g, &BTreeMap::new(), 1, 1.0, &config(10.0));
        assert_eq!(
            selection.ranked(),
            vec![
                (WorkspaceItem::Node(NodeId::new("b")), 3.0),
                (WorkspaceItem::Node(NodeId::new("a")), 2.0),
            ]
        );
        assert!((selection.capacity_used - 3.0).abs() < 1e-12);
    }

    #[test]
    fn greedy_fill_skips_items_that_do_not_fit() {
        let g = graph(
            vec![
                node("a", 10.0, 2.0),
                node("b", 8.0, 2.0),
                node("c", 1.5, 1.0),
            ],
            vec![],
        );
        let selection = select(&g, &BTreeMap::new(), 1, 1.0, &config(3.0));
        assert_eq!(
            items(&selection),
            vec![
                WorkspaceItem::Node(NodeId::new("a")),
                WorkspaceItem::Node(NodeId::new("c")),
            ]
        );
        assert_eq!(selection.truncated, 1);
        assert!(selection.capacity_used <= selection.capacity_budget);
    }

    #[test]
    fn inactive_and_incomplete_nodes_are_not_candidates() {
        let mut pending = node("p", 5.0, 1.0);
        pending.complete = false;
        let g = graph(vec![node("a", 0.5, 1.0), pending, node("b", 1.0, 1.0)], vec![]);
        let selection = select(&g, &BTreeMap::new(), 1, 1.0, &config(10.0));
        assert_eq!(items(&selection), vec![WorkspaceItem::Node(NodeId::new("b"))]);
    }

    #[test]
    fn log_weight_z_score_breaks_energy_ties() {
        let mut strong = node("a", 2.0, 1.0);
        strong.reinforcement_weight = 1.0;
        let g = graph(vec![strong, node("b", 2.0, 1.0)], vec![]);
        let selection = select(&g, &BTreeMap::new(), 1, 1.0, &config(10.0));
        let ranked = selection.ranked();
        // Two values standardize to z = +1 and -1.
        assert_eq!(ranked.first().map(|(i, _)| i.clone()), Some(WorkspaceItem::Node(NodeId::new("a"))));
        let scores: Vec<f64> = ranked.iter().map(|(_, s)| *s).collect();
        assert_eq!(scores.len(), 2);
        assert!(scores.first().is_some_and(|s| (s - 2.0 * 1.0_f64.exp()).abs() < 1e-9));
        assert!(scores.get(1).is_some_and(|s| (s - 2.0 * (-1.0_f64).exp()).abs() < 1e-9));
    }

    #[test]
    fn z_score_is_clamped() {
        let mut candidates: Vec<WorkspaceCandidate> = (0..10)
            .map(|i| WorkspaceCandidate {
                item: WorkspaceItem::Node(NodeId::new(format!("n{i}"))),
                energy: 1.0,
                cost: 1.0,
                log_weight: if i == 0 { 100.0 } else { 0.0 },
                embedding: None,
                footprint: BTreeSet::new(),
                score: 0.0,
            })
            .collect();
        let config = WorkspaceConfig {
            z_clamp: 2.0,
            ..WorkspaceConfig::default()
        };
        score(&mut candidates, &config);
        let top = candidates.first().map(|c| c.score);
        assert!(top.is_some_and(|s| (s - 2.0_f64.exp()).abs() < 1e-9));
    }

    #[test]
    fn near_duplicates_fold_into_one() {
        let mut a = node("a", 3.0, 1.0);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = node("b", 2.0, 1.0);
        b.embedding = Some(vec![1.0, 0.0]);
        let mut c = node("c", 1.0, 1.0);
        c.embedding = Some(vec![0.0, 1.0]);
        let g = graph(
            vec![a, b, c],
            vec![
                Link::new("ab", "a", "b", LinkType::Semantic, 0.5),
                Link::new("ba", "b", "a", LinkType::Semantic, 0.5),
            ],
        );
        let selection = select(&g, &BTreeMap::new(), 1, 1.0, &config(10.0));
        assert_eq!(
            items(&selection),
            vec![
                WorkspaceItem::Node(NodeId::new("a")),
                WorkspaceItem::Node(NodeId::new("c")),
            ]
        );
        assert_eq!(selection.deduplicated, 1);
    }

    #[test]
    fn unembedded_neighbours_are_not_duplicates() {
        let g = graph(
            vec![node("a", 3.0, 1.0), node("b", 2.0, 1.0)],
            vec![
                Link::new("ab", "a", "b", LinkType::Semantic, 0.5),
                Link::new("ba", "b", "a", LinkType::Semantic, 0.5),
            ],
        );
        let selection = select(&g, &BTreeMap::new(), 1, 1.0, &config(10.0));
        assert_eq!(
            items(&selection),
            vec![
                WorkspaceItem::Node(NodeId::new("a")),
                WorkspaceItem::Node(NodeId::new("b")),
            ]
        );
        assert_eq!(selection.deduplicated, 0);
    }

    #[test]
    fn entity_members_are_represented_by_the_entity() {
        let g = graph(
            vec![node("a", 2.0, 1.0), node("b", 2.0, 2.0), node("c", 1.0, 1.0)],
            vec![],
        );
        let entity = EmergentEntity {
            id: ch(),
            channel: ch(),
            members: ["a", "b"].into_iter().map(NodeId::new).collect(),
            energy: 4.0,
            coherence: 1.0,
            score: 4.0,
            born_tick: 0,
        };
        let entities: BTreeMap<EntityId, EmergentEntity> = [(ch(), entity)].into_iter().collect();
        let selection = select(&g, &entities, 1, 1.0, &config(10.0));
        assert_eq!(
            items(&selection),
            vec![
                WorkspaceItem::Entity(ch()),
                WorkspaceItem::Node(NodeId::new("c")),
            ]
        );
        let entity_cost = selection.entries.first().map(|e| e.cost);
        assert!(entity_cost.is_some_and(|c| (c - 3.0).abs() < f64::EPSILON));
        let members: BTreeMap<EntityId, BTreeSet<NodeId>> = [(ch(), entities.get(&ch()).map(|e| e.members.clone()).unwrap_or_default())]
            .into_iter()
            .collect();
        assert!(selection.contains_node(&NodeId::new("a"), &members));
    }

    #[test]
    fn selection_is_deterministic() {
        let g = graph(
            vec![node("a", 2.0, 1.0), node("b", 2.0, 1.0), node("c", 2.0, 1.0)],
            vec![],
        );
        let first = select(&g, &BTreeMap::new(), 1, 1.0, &config(2.0));
        let second = select(&g, &BTreeMap::new(), 1, 1.0, &config(2.0));
        assert_eq!(first, second);
        assert_eq!(
            items(&first),
            vec![
                WorkspaceItem::Node(NodeId::new("a")),
                WorkspaceItem::Node(NodeId::new("b")),
            ]
        );
    }
}
