//! Engine clock, tick cycle, and orchestration for the Cascade engine.
//!
//! This crate sequences the mechanisms of `cascade-dynamics` into the tick
//! cycle (merge inputs, diffusion, decay, plasticity, criticality,
//! emergence, workspace, commit) and drives it from an async loop that
//! talks to the graph store without blocking on it.
//!
//! # Modules
//!
//! - [`clock`] -- Tick counter, simulated time, and stimulus recency.
//! - [`config`] -- Configuration loading from `cascade-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- The [`Engine`] facade: queue inputs, tick, read results.
//! - [`runner`] -- The async loop with preemptive stimulus handling.
//! - [`scheduler`] -- The adaptive maintenance-tick interval.
//! - [`telemetry`] -- [`TelemetrySink`] and its implementations.
//! - [`tick`] -- The phased tick cycle.

pub mod clock;
pub mod config;
pub mod engine;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
pub mod tick;

// Re-export primary types at crate root.
pub use config::{ConfigError, EngineConfig, LogFormat};
pub use engine::{Engine, EngineInput};
pub use runner::{RunChannels, RunEndReason, RunOptions, RunSummary, RunnerError, run_engine};
pub use scheduler::TickScheduler;
pub use telemetry::{BufferSink, ChannelSink, NoOpSink, TelemetrySink, TracingSink};
pub use tick::{EngineState, TickError, TickResult};
