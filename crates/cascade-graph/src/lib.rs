//! Activation graph and graph-store plumbing for the Cascade engine.
//!
//! This crate models the graph the engine runs on: nodes carrying
//! per-channel energy, weighted directed links between them, and the
//! interface to the external store the graph comes from.
//!
//! # Modules
//!
//! - [`error`] -- Error types for snapshot and store operations.
//! - [`snapshot`] -- [`GraphSnapshot`]: nodes and links with adjacency
//!   indexes, traversability checks, and refresh merging.
//! - [`store`] -- The [`GraphStore`] trait, write-back deltas, completion
//!   requests, and the in-memory [`MemoryStore`].

pub mod error;
pub mod snapshot;
pub mod store;

// Re-export primary types at crate root.
pub use error::{GraphError, StoreError};
pub use snapshot::{ElementRef, GraphSnapshot};
pub use store::{CompletionRequest, GraphStore, MemoryStore, SeedGraph, SnapshotDelta};
