//! Energy dynamics for the Cascade engine.
//!
//! This crate holds every mechanism that transforms a [`GraphSnapshot`]
//! during a tick, with no I/O of its own. It sits between `cascade-graph`
//! (which owns the graph model) and `cascade-core` (which sequences the
//! mechanisms into a tick cycle and talks to the store).
//!
//! # Modules
//!
//! - [`anomaly`] -- Tolerated steady-state anomalies ([`AnomalyLog`])
//! - [`avalanche`] -- Cascade size tracking and power-law fit ([`AvalancheTracker`])
//! - [`config`] -- Mechanism parameters and validation ([`DynamicsConfig`])
//! - [`criticality`] -- Spectral-radius estimation and the PI controller
//! - [`decay`] -- State decay, inhibition, saturation, sanitizing
//! - [`diffusion`] -- Per-channel diffusion strides and transition strategies
//! - [`emergence`] -- Cluster detection and entity identity ([`EntityTracker`])
//! - [`error`] -- Configuration errors ([`ParameterError`])
//! - [`plasticity`] -- Gated learning, link creation, reinforcement
//! - [`stimulus`] -- Stimulus injection
//! - [`workspace`] -- Workspace scoring and selection
//!
//! [`GraphSnapshot`]: cascade_graph::GraphSnapshot

pub mod anomaly;
pub mod avalanche;
pub mod config;
pub mod criticality;
pub mod decay;
pub mod diffusion;
pub mod emergence;
pub mod error;
mod math;
pub mod plasticity;
pub mod stimulus;
pub mod workspace;

// Re-export primary types at crate root.
pub use anomaly::AnomalyLog;
pub use avalanche::AvalancheTracker;
pub use config::{
    CriticalityConfig, DecayConfig, DiffusionConfig, DynamicsConfig, EmergenceConfig,
    IdentityConflictPolicy, LinkTypeParams, PlasticityConfig, TransitionRule, WorkspaceConfig,
};
pub use criticality::{Adjustment, CriticalityController, SpectralEstimate, estimate_rho};
pub use decay::{DecayOutcome, decay_stage};
pub use diffusion::{StrideOutcome, TransitionStrategy, Traversal, diffuse};
pub use emergence::{EmergenceOutcome, EntityTracker};
pub use error::ParameterError;
pub use plasticity::{LearningContext, LearningOutcome, LinkBudget};
pub use stimulus::{InjectionOutcome, inject};
