//! Graph-store interface and an in-memory implementation.
//!
//! The engine never blocks on the store. It pulls snapshots when a refresh
//! is due, pushes a [`SnapshotDelta`] after each tick without awaiting the
//! outcome, and files a [`CompletionRequest`] for elements it found
//! incomplete. [`MemoryStore`] backs tests and the standalone binary; it
//! can be seeded from a JSON file of nodes and links.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use cascade_types::{EntityId, Link, LinkId, Node, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::snapshot::{ElementRef, GraphSnapshot};

/// Engine-owned state written back to the store after a tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDelta {
    /// Tick the delta was produced at.
    pub tick: u64,
    /// Full per-channel energy of every node.
    pub node_energy: BTreeMap<NodeId, BTreeMap<EntityId, f64>>,
    /// Learned weight of nodes that received reinforcement.
    pub node_reinforcement: BTreeMap<NodeId, f64>,
    /// Current weight of every link the engine changed.
    pub link_weights: BTreeMap<LinkId, f64>,
    /// Links created by the engine this tick.
    pub created_links: Vec<Link>,
    /// Links pruned by the engine this tick.
    pub pruned_links: Vec<LinkId>,
}

impl SnapshotDelta {
    /// Whether the delta carries no changes.
    pub fn is_empty(&self) -> bool {
        self.node_energy.is_empty()
            && self.node_reinforcement.is_empty()
            && self.link_weights.is_empty()
            && self.created_links.is_empty()
            && self.pruned_links.is_empty()
    }
}

/// A request asking the store to finish loading an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The incomplete element.
    pub element: ElementRef,
    /// Tick at which the engine first noticed it.
    pub tick: u64,
}

/// Serialized seed graph: plain node and link lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedGraph {
    /// Nodes to load.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Links to load.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// The external graph store as seen by the engine.
pub trait GraphStore: Send + Sync {
    /// Fetch the current graph.
    fn load_snapshot(&self) -> impl Future<Output = Result<GraphSnapshot, StoreError>> + Send;

    /// Persist engine-owned state.
    fn write_back(&self, delta: SnapshotDelta)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Ask the store to complete an element.
    fn request_completion(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-memory graph store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: RwLock<GraphSnapshot>,
    completions: RwLock<Vec<CompletionRequest>>,
    writes: RwLock<u64>,
}

impl MemoryStore {
    /// Create a store holding the given graph.
    pub fn new(graph: GraphSnapshot) -> Self {
        Self {
            graph: RwLock::new(graph),
            completions: RwLock::new(Vec::new()),
            writes: RwLock::new(0),
        }
    }

    /// Create a store from a seed graph.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Graph`] on duplicate ids or self-loops.
    pub fn from_seed(seed: SeedGraph) -> Result<Self, StoreError> {
        Ok(Self::new(GraphSnapshot::from_parts(seed.nodes, seed.links)?))
    }

    /// Load a seed graph from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read,
    /// [`StoreError::Decode`] if it is not a seed graph, or
    /// [`StoreError::Graph`] if the graph is invalid.
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        let seed: SeedGraph = serde_json::from_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            nodes = seed.nodes.len(),
            links = seed.links.len(),
            "Loaded seed graph"
        );
        Self::from_seed(seed)
    }

    /// Replace or insert a node, as an external writer would.
    pub async fn upsert_node(&self, node: Node) {
        let mut graph = self.graph.write().await;
        if let Some(existing) = graph.node_mut(&node.id) {
            *existing = node;
        } else {
            // The id was just checked to be absent.
            let _ = graph.add_node(node);
        }
    }

    /// Completion requests received so far.
    pub async fn completion_requests(&self) -> Vec<CompletionRequest> {
        self.completions.read().await.clone()
    }

    /// Number of deltas written back so far.
    pub async fn write_count(&self) -> u64 {
        *self.writes.read().await
    }

    /// A copy of the stored graph.
    pub async fn graph(&self) -> GraphSnapshot {
        self.graph.read().await.clone()
    }
}

impl GraphStore for MemoryStore {
    async fn load_snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        Ok(self.graph.read().await.clone())
    }

    async fn write_back(&self, delta: SnapshotDelta) -> Result<(), StoreError> {
        let mut graph = self.graph.write().await;
        for (id, energy) in delta.node_energy {
            if let Some(node) = graph.node_mut(&id) {
                node.energy = energy;
            }
        }
        for (id, weight) in delta.node_reinforcement {
            if let Some(node) = graph.node_mut(&id) {
                node.reinforcement_weight = weight;
            }
        }
        for (id, weight) in delta.link_weights {
            if let Some(link) = graph.link_mut(&id) {
                link.weight = weight;
            }
        }
        for link in delta.created_links {
            if graph.link(&link.id).is_none() {
                graph.add_link(link)?;
            }
        }
        for id in delta.pruned_links {
            // Already-removed links are fine.
            let _ = graph.remove_link(&id);
        }
        drop(graph);

        let mut writes = self.writes.write().await;
        *writes = writes.saturating_add(1);
        Ok(())
    }

    async fn request_completion(&self, request: CompletionRequest) -> Result<(), StoreError> {
        tracing::debug!(element = %request.element, tick = request.tick, "Completion requested");
        self.completions.write().await.push(request);
        Ok(())
    }
}
