//! Shared type definitions for the Cascade energy-dynamics engine.
//!
//! This crate is the single source of truth for the types used across the
//! Cascade workspace. Types visible to external consumers (workspace
//! selections, criticality readings, telemetry) flow downstream to
//! `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe string wrappers for node, link, and entity ids
//! - [`enums`] -- Node and link kinds, safety regimes, stimulus split modes
//! - [`structs`] -- Graph elements, external inputs, entities, global state
//! - [`events`] -- Telemetry events and tolerated anomalies

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{LinkType, NodeType, SafetyState, StimulusSplit};
pub use events::{Anomaly, CapacityKind, DissolveReason, TelemetryEvent, TelemetryRecord};
pub use ids::{EntityId, LinkId, NodeId};
pub use structs::{
    ControllerState, CriticalityState, EmergentEntity, EmotionVector, GlobalState, Link,
    LinkRequest, Node, Probation, ReinforcementSignal, ReinforcementTarget, Stimulus,
    TraversalStats, TunedParams, WorkspaceEntry, WorkspaceItem, WorkspaceSelection,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes the bindings for every #[ts(export)] type into the
        // crate-relative `bindings/` directory.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::NodeId::export_all();
        let _ = crate::ids::LinkId::export_all();
        let _ = crate::ids::EntityId::export_all();

        // Enums
        let _ = crate::enums::NodeType::export_all();
        let _ = crate::enums::LinkType::export_all();
        let _ = crate::enums::SafetyState::export_all();
        let _ = crate::enums::StimulusSplit::export_all();

        // Structs
        let _ = crate::structs::EmergentEntity::export_all();
        let _ = crate::structs::WorkspaceItem::export_all();
        let _ = crate::structs::WorkspaceEntry::export_all();
        let _ = crate::structs::WorkspaceSelection::export_all();
        let _ = crate::structs::TunedParams::export_all();
        let _ = crate::structs::CriticalityState::export_all();

        // Events
        let _ = crate::events::DissolveReason::export_all();
        let _ = crate::events::TelemetryEvent::export_all();
        let _ = crate::events::CapacityKind::export_all();
        let _ = crate::events::Anomaly::export_all();
    }
}
