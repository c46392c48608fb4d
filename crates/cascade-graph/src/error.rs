//! Error types for the `cascade-graph` crate.
//!
//! Snapshot construction returns [`GraphError`]; store operations return
//! [`StoreError`], which wraps graph errors alongside I/O and decoding
//! failures.

use cascade_types::{LinkId, NodeId};

/// Errors that can occur while building or editing a graph snapshot.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A node was not found in the snapshot.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A link was not found in the snapshot.
    #[error("link not found: {0}")]
    LinkNotFound(LinkId),

    /// A node with the same id is already present.
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// A link with the same id is already present.
    #[error("duplicate link id: {0}")]
    DuplicateLink(LinkId),

    /// A link's source and target are the same node.
    #[error("link {0} is a self-loop")]
    SelfLoop(LinkId),
}

/// Errors raised by a [`GraphStore`](crate::store::GraphStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The seed file could not be read.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The seed file is not valid graph JSON.
    #[error("store decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The stored graph is structurally invalid.
    #[error("store graph error: {0}")]
    Graph(#[from] GraphError),

    /// The backing store is not reachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
