//! Enumeration types for the Cascade engine.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

/// The kind of content a node represents.
///
/// Node type selects the state-decay multiplier applied to the node's
/// energy: memory-like content fades slowly, task-like content quickly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum NodeType {
    /// An abstract idea or piece of knowledge.
    #[default]
    Concept,
    /// A recorded episode or long-lived memory.
    Memory,
    /// A short-lived task or intention.
    Task,
    /// A goal that persists across many tasks.
    Goal,
    /// A fresh perception from an external stimulus.
    Percept,
}

impl NodeType {
    /// All node types, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Concept,
        Self::Memory,
        Self::Task,
        Self::Goal,
        Self::Percept,
    ];
}

// ---------------------------------------------------------------------------
// Link types
// ---------------------------------------------------------------------------

/// The kind of relation a link encodes.
///
/// Link type bounds the weight range, sets the slow weight-decay rate, and
/// decides whether the link carries energy at all: inhibitory links only
/// suppress their target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum LinkType {
    /// Semantic association between two pieces of content.
    #[default]
    Semantic,
    /// Causal or enabling relation.
    Causal,
    /// Memory-like association formed by co-experience.
    Episodic,
    /// Task-scoped association, expected to fade quickly.
    Task,
    /// Blocking relation; weight is non-positive and suppresses the target.
    Inhibitory,
}

impl LinkType {
    /// All link types, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Semantic,
        Self::Causal,
        Self::Episodic,
        Self::Task,
        Self::Inhibitory,
    ];

    /// Whether this link type suppresses rather than transports energy.
    pub const fn is_inhibitory(self) -> bool {
        matches!(self, Self::Inhibitory)
    }
}

// ---------------------------------------------------------------------------
// Criticality
// ---------------------------------------------------------------------------

/// Coarse classification of the propagation regime from the spectral radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SafetyState {
    /// rho below 0.5: activity is collapsing.
    Dying,
    /// rho in [0.5, 0.8): activity fails to spread.
    Subcritical,
    /// rho in [0.8, 1.2): the healthy operating band.
    #[default]
    Critical,
    /// rho at or above 1.2: activity runs away.
    Supercritical,
}

impl SafetyState {
    /// Classify a spectral-radius estimate.
    pub fn classify(rho: f64) -> Self {
        if rho < 0.5 {
            Self::Dying
        } else if rho < 0.8 {
            Self::Subcritical
        } else if rho < 1.2 {
            Self::Critical
        } else {
            Self::Supercritical
        }
    }
}

// ---------------------------------------------------------------------------
// Stimulus distribution
// ---------------------------------------------------------------------------

/// How a stimulus budget is split across its entry nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum StimulusSplit {
    /// Every entry node receives an equal share.
    #[default]
    Uniform,
    /// Shares are proportional to each node's gap below its activation
    /// threshold; entries already above threshold receive nothing unless
    /// every entry is.
    ThresholdGap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_state_bands() {
        assert_eq!(SafetyState::classify(0.2), SafetyState::Dying);
        assert_eq!(SafetyState::classify(0.5), SafetyState::Subcritical);
        assert_eq!(SafetyState::classify(1.0), SafetyState::Critical);
        assert_eq!(SafetyState::classify(1.19), SafetyState::Critical);
        assert_eq!(SafetyState::classify(1.2), SafetyState::Supercritical);
    }

    #[test]
    fn only_inhibitory_links_inhibit() {
        let inhibiting: Vec<LinkType> = LinkType::ALL
            .iter()
            .copied()
            .filter(|t| t.is_inhibitory())
            .collect();
        assert_eq!(inhibiting, vec![LinkType::Inhibitory]);
    }

    #[test]
    fn link_types_use_snake_case_names() {
        let json = serde_json::to_string(&LinkType::Episodic).ok();
        assert_eq!(json.as_deref(), Some("\"episodic\""));
    }
}
