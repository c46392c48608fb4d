//! Graph snapshot: nodes and weighted directed links held in memory.
//!
//! The [`GraphSnapshot`] is the engine's working copy of the activation
//! graph. The engine owns every energy value and learned weight in it; the
//! external store only contributes structure and metadata.
//!
//! Internally, an adjacency map indexes outbound links per node:
//! `BTreeMap<NodeId, Vec<LinkId>>`. A reverse adjacency map indexes inbound
//! links. Links may reference nodes the store has not delivered yet; such
//! links are indexed but never traversable until both endpoints arrive.

use std::collections::{BTreeMap, BTreeSet};

use cascade_types::{EntityId, Link, LinkId, LinkType, Node, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// A node or link the store has not fully delivered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ElementRef {
    /// A node.
    Node(NodeId),
    /// A link.
    Link(LinkId),
}

impl core::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node:{id}"),
            Self::Link(id) => write!(f, "link:{id}"),
        }
    }
}

/// The activation graph holding all nodes and links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// All nodes indexed by their identifier.
    nodes: BTreeMap<NodeId, Node>,
    /// All links indexed by their identifier.
    links: BTreeMap<LinkId, Link>,
    /// Outbound adjacency: node -> link IDs departing from it.
    outbound: BTreeMap<NodeId, Vec<LinkId>>,
    /// Inbound adjacency: node -> link IDs arriving at it.
    inbound: BTreeMap<NodeId, Vec<LinkId>>,
}

impl GraphSnapshot {
    /// Create an empty snapshot.
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            outbound: BTreeMap::new(),
            inbound: BTreeMap::new(),
        }
    }

    /// Build a snapshot from node and link lists.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate id or self-loop encountered.
    pub fn from_parts(nodes: Vec<Node>, links: Vec<Link>) -> Result<Self, GraphError> {
        let mut snapshot = Self::new();
        for node in nodes {
            snapshot.add_node(node)?;
        }
        for link in links {
            snapshot.add_link(link)?;
        }
        Ok(snapshot)
    }

    // -------------------------------------------------------------------
    // Node operations
    // -------------------------------------------------------------------

    /// Add a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] if the id is already present.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.outbound.entry(node.id.clone()).or_default();
        self.inbound.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Get a node.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Get a node mutably.
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Iterate over nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Iterate over nodes mutably in id order.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (&NodeId, &mut Node)> {
        self.nodes.iter_mut()
    }

    // -------------------------------------------------------------------
    // Link operations
    // -------------------------------------------------------------------

    /// Add a link. Endpoints need not be present yet.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateLink`] if the id is already present,
    /// or [`GraphError::SelfLoop`] if source and target coincide.
    pub fn add_link(&mut self, link: Link) -> Result<(), GraphError> {
        if self.links.contains_key(&link.id) {
            return Err(GraphError::DuplicateLink(link.id));
        }
        if link.source == link.target {
            return Err(GraphError::SelfLoop(link.id));
        }
        self.outbound
            .entry(link.source.clone())
            .or_default()
            .push(link.id.clone());
        self.inbound
            .entry(link.target.clone())
            .or_default()
            .push(link.id.clone());
        self.links.insert(link.id.clone(), link);
        Ok(())
    }

    /// Remove a link and its adjacency entries.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::LinkNotFound`] if the id is unknown.
    pub fn remove_link(&mut self, id: &LinkId) -> Result<Link, GraphError> {
        let link = self
            .links
            .remove(id)
            .ok_or_else(|| GraphError::LinkNotFound(id.clone()))?;
        if let Some(out) = self.outbound.get_mut(&link.source) {
            out.retain(|l| l != id);
        }
        if let Some(inc) = self.inbound.get_mut(&link.target) {
            inc.retain(|l| l != id);
        }
        Ok(link)
    }

    /// Get a link.
    pub fn link(&self, id: &LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    /// Get a link mutably.
    pub fn link_mut(&mut self, id: &LinkId) -> Option<&mut Link> {
        self.links.get_mut(id)
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Iterate over links in id order.
    pub fn links(&self) -> impl Iterator<Item = (&LinkId, &Link)> {
        self.links.iter()
    }

    /// Iterate over links mutably in id order.
    pub fn links_mut(&mut self) -> impl Iterator<Item = (&LinkId, &mut Link)> {
        self.links.iter_mut()
    }

    // -------------------------------------------------------------------
    // Graph queries
    // -------------------------------------------------------------------

    /// Whether a link may carry energy or learning this tick: the link and
    /// both endpoints are present and complete.
    pub fn is_traversable(&self, link: &Link) -> bool {
        link.complete
            && self.nodes.get(&link.source).is_some_and(|n| n.complete)
            && self.nodes.get(&link.target).is_some_and(|n| n.complete)
    }

    /// Traversable links departing from a node, in insertion order.
    pub fn outgoing(&self, node: &NodeId) -> Vec<&Link> {
        self.adjacent(self.outbound.get(node))
    }

    /// Traversable links arriving at a node, in insertion order.
    pub fn incoming(&self, node: &NodeId) -> Vec<&Link> {
        self.adjacent(self.inbound.get(node))
    }

    fn adjacent(&self, ids: Option<&Vec<LinkId>>) -> Vec<&Link> {
        let Some(ids) = ids else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.links.get(id))
            .filter(|link| self.is_traversable(link))
            .collect()
    }

    /// Number of links (of any state) departing from a node.
    pub fn out_degree(&self, node: &NodeId) -> usize {
        self.outbound.get(node).map_or(0, Vec::len)
    }

    /// Targets of traversable links out of `node` plus sources of
    /// traversable links into it.
    pub fn neighbors(&self, node: &NodeId) -> BTreeSet<NodeId> {
        let out = self.outgoing(node).into_iter().map(|l| l.target.clone());
        let inc = self.incoming(node).into_iter().map(|l| l.source.clone());
        out.chain(inc).collect()
    }

    /// Find an existing link with the same endpoints and type.
    pub fn find_link(&self, source: &NodeId, target: &NodeId, link_type: LinkType) -> Option<&Link> {
        self.outbound
            .get(source)?
            .iter()
            .filter_map(|id| self.links.get(id))
            .find(|l| &l.target == target && l.link_type == link_type)
    }

    /// Every node or link that is incomplete or references a missing node.
    pub fn incomplete_elements(&self) -> Vec<ElementRef> {
        let nodes = self
            .nodes
            .values()
            .filter(|n| !n.complete)
            .map(|n| ElementRef::Node(n.id.clone()));
        let links = self
            .links
            .values()
            .filter(|l| {
                !l.complete
                    || !self.nodes.contains_key(&l.source)
                    || !self.nodes.contains_key(&l.target)
            })
            .map(|l| ElementRef::Link(l.id.clone()));
        nodes.chain(links).collect()
    }

    /// Every channel that holds energy somewhere in the graph.
    pub fn channels(&self) -> BTreeSet<EntityId> {
        self.nodes
            .values()
            .flat_map(|n| n.energy.keys().cloned())
            .collect()
    }

    /// Total energy over all nodes and channels.
    pub fn total_energy(&self) -> f64 {
        self.nodes.values().map(Node::total_energy).sum()
    }

    /// Total energy per channel.
    pub fn energy_by_channel(&self) -> BTreeMap<EntityId, f64> {
        let mut totals: BTreeMap<EntityId, f64> = BTreeMap::new();
        for node in self.nodes.values() {
            for (entity, value) in &node.energy {
                *totals.entry(entity.clone()).or_insert(0.0) += value;
            }
        }
        totals
    }

    // -------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------

    /// Merge a fresh store snapshot into this one.
    ///
    /// Store-owned fields (type, embedding, base weight, thresholds, cost,
    /// completeness, emotion) are taken from `fresh`. Engine-owned state
    /// (energies, learned weights, traversal statistics, valence,
    /// reinforcement, probation) is kept for elements already present.
    /// Elements new to this snapshot are inserted as delivered. Nothing is
    /// removed: links the engine created may not have reached the store yet.
    pub fn merge_refresh(&mut self, fresh: Self) {
        for (id, incoming) in fresh.nodes {
            match self.nodes.get_mut(&id) {
                Some(existing) => {
                    existing.node_type = incoming.node_type;
                    existing.embedding = incoming.embedding;
                    existing.base_weight = incoming.base_weight;
                    existing.thresholds = incoming.thresholds;
                    existing.cost = incoming.cost;
                    existing.complete = incoming.complete;
                }
                None => {
                    // Freshly delivered ids cannot collide.
                    let _ = self.add_node(incoming);
                }
            }
        }
        for (id, incoming) in fresh.links {
            match self.links.get_mut(&id) {
                Some(existing) => {
                    existing.embedding = incoming.embedding;
                    existing.emotion = incoming.emotion;
                    existing.complete = incoming.complete;
                }
                None => {
                    if let Err(err) = self.add_link(incoming) {
                        tracing::warn!(link = %id, error = %err, "Skipping refreshed link");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cascade_types::NodeType;

    use super::*;

    fn make_chain() -> GraphSnapshot {
        let nodes = vec![
            Node::new("a", NodeType::Concept),
            Node::new("b", NodeType::Concept),
            Node::new("c", NodeType::Memory),
        ];
        let links = vec![
            Link::new("ab", "a", "b", LinkType::Semantic, 0.8),
            Link::new("bc", "b", "c", LinkType::Causal, 0.5),
        ];
        GraphSnapshot::from_parts(nodes, links).unwrap_or_default()
    }

    #[test]
    fn build_and_count() {
        let graph = make_chain();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.link_count(), 2);
        assert_eq!(graph.out_degree(&NodeId::new("a")), 1);
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut graph = make_chain();
        let result = graph.add_node(Node::new("a", NodeType::Task));
        assert!(matches!(result, Err(GraphError::DuplicateNode(_))));
    }

    #[test]
    fn self_loop_rejected() {
        let mut graph = make_chain();
        let result = graph.add_link(Link::new("aa", "a", "a", LinkType::Semantic, 0.1));
        assert!(matches!(result, Err(GraphError::SelfLoop(_))));
    }

    #[test]
    fn neighbors_span_both_directions() {
        let graph = make_chain();
        let around_b = graph.neighbors(&NodeId::new("b"));
        assert!(around_b.contains(&NodeId::new("a")));
        assert!(around_b.contains(&NodeId::new("c")));
        assert_eq!(around_b.len(), 2);
    }

    #[test]
    fn dangling_link_is_not_traversable() {
        let mut graph = make_chain();
        let _ = graph.add_link(Link::new("cx", "c", "x", LinkType::Semantic, 0.3));
        assert!(graph.outgoing(&NodeId::new("c")).is_empty());
        assert_eq!(
            graph.incomplete_elements(),
            vec![ElementRef::Link(LinkId::new("cx"))]
        );
    }

    #[test]
    fn incomplete_node_blocks_its_links() {
        let mut graph = make_chain();
        if let Some(node) = graph.node_mut(&NodeId::new("b")) {
            node.complete = false;
        }
        assert!(graph.outgoing(&NodeId::new("a")).is_empty());
        assert!(graph.outgoing(&NodeId::new("b")).is_empty());
    }

    #[test]
    fn remove_link_updates_adjacency() {
        let mut graph = make_chain();
        assert!(graph.remove_link(&LinkId::new("ab")).is_ok());
        assert_eq!(graph.out_degree(&NodeId::new("a")), 0);
        assert!(graph.incoming(&NodeId::new("b")).is_empty());
        assert!(graph.remove_link(&LinkId::new("ab")).is_err());
    }

    #[test]
    fn find_link_matches_type() {
        let graph = make_chain();
        let a = NodeId::new("a");
        let b = NodeId::new("b");
        assert!(graph.find_link(&a, &b, LinkType::Semantic).is_some());
        assert!(graph.find_link(&a, &b, LinkType::Causal).is_none());
    }

    #[test]
    fn refresh_keeps_engine_state() {
        let mut graph = make_chain();
        let channel = EntityId::new("e1");
        if let Some(node) = graph.node_mut(&NodeId::new("a")) {
            node.set_energy(&channel, 3.0);
        }
        if let Some(link) = graph.link_mut(&LinkId::new("ab")) {
            link.weight = 0.9;
        }

        let mut fresh_a = Node::new("a", NodeType::Goal);
        fresh_a.cost = 2.0;
        let fresh = GraphSnapshot::from_parts(
            vec![fresh_a, Node::new("d", NodeType::Concept)],
            vec![
                Link::new("ab", "a", "b", LinkType::Semantic, 0.1),
                Link::new("ad", "a", "d", LinkType::Semantic, 0.4),
            ],
        )
        .unwrap_or_default();
        graph.merge_refresh(fresh);

        let a = graph.node(&NodeId::new("a"));
        assert!(a.is_some_and(|n| (n.energy_in(&channel) - 3.0).abs() < f64::EPSILON));
        assert!(a.is_some_and(|n| n.node_type == NodeType::Goal));
        let ab = graph.link(&LinkId::new("ab"));
        assert!(ab.is_some_and(|l| (l.weight - 0.9).abs() < f64::EPSILON));
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.out_degree(&NodeId::new("a")), 2);
    }

    #[test]
    fn energy_by_channel_sums_nodes() {
        let mut graph = make_chain();
        let e1 = EntityId::new("e1");
        let e2 = EntityId::new("e2");
        for (id, value) in [("a", 1.0), ("b", 2.0)] {
            if let Some(node) = graph.node_mut(&NodeId::new(id)) {
                node.set_energy(&e1, value);
                node.set_energy(&e2, 0.5);
            }
        }
        let totals = graph.energy_by_channel();
        assert!(totals.get(&e1).is_some_and(|v| (v - 3.0).abs() < 1e-12));
        assert!((graph.total_energy() - 4.0).abs() < 1e-12);
        assert_eq!(graph.channels().len(), 2);
    }
}
