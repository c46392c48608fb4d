//! Type-safe identifier wrappers.
//!
//! Node, link, and entity identifiers come from the external graph store,
//! which keys everything by opaque strings. Each kind of identifier gets its
//! own newtype so a node id can never be passed where a link id is expected.
//!
//! Links created by the engine itself (through the link-creation interface)
//! receive a UUID v7 identifier via [`LinkId::generate`], which keeps them
//! time-ordered in the store.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`] value.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a node in the activation graph.
    NodeId
}

define_id! {
    /// Unique identifier for a directed link in the activation graph.
    LinkId
}

define_id! {
    /// Identifier of an energy channel and of the emergent entity it carries.
    ///
    /// Every node holds one energy value per entity id. An emergent entity
    /// that forms inside a channel takes the channel id; additional clusters
    /// in the same channel receive a derived id (see [`EntityId::derive`]).
    EntityId
}

impl LinkId {
    /// Generate a fresh time-ordered link id for an engine-created link.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl EntityId {
    /// Derive the id of a secondary cluster in this channel, anchored on
    /// the cluster's highest-energy node.
    pub fn derive(&self, anchor: &NodeId) -> Self {
        Self(format!("{}:{}", self.0, anchor.0))
    }

    /// Return the channel part of a derived id (the id itself if underived).
    pub fn channel(&self) -> Self {
        match self.0.split_once(':') {
            Some((channel, _)) => Self(channel.to_owned()),
            None => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let node = NodeId::new("a");
        let link = LinkId::new("a");
        // Same text, different types -- the compiler enforces no mixing.
        assert_eq!(node.as_str(), link.as_str());
    }

    #[test]
    fn generated_link_ids_are_unique() {
        let a = LinkId::generate();
        let b = LinkId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn derived_entity_ids_keep_their_channel() {
        let channel = EntityId::new("builder");
        let derived = channel.derive(&NodeId::new("n7"));
        assert_eq!(derived.as_str(), "builder:n7");
        assert_eq!(derived.channel(), channel);
        assert_eq!(channel.channel(), channel);
    }

    #[test]
    fn id_roundtrip_serde() {
        let original = NodeId::new("concept_42");
        let json = serde_json::to_string(&original).ok();
        assert_eq!(json.as_deref(), Some("\"concept_42\""));
        let restored: Result<NodeId, _> = serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(original));
    }
}
