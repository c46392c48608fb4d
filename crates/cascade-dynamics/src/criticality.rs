//! Spectral-radius estimation and the criticality controller.
//!
//! The propagation operator over the active subgraph is
//!
//! ```text
//! T = (1 - d) [ (1 - alpha) I + alpha G^T ]
//! ```
//!
//! where `G` holds the raw positive weights of the non-inhibitory,
//! traversable links among active nodes, `alpha` is the mixing coefficient
//! at the reference interval, and `d = 1 - exp(-delta_state * dt_ref)` is
//! the per-interval decay fraction. `rho(T)` is the branching factor of the
//! dynamics: above one activity grows, below one it dies out. A
//! row-normalized operator would have `rho = 1 - d` regardless of the
//! weights, so the estimate deliberately keeps the raw weights.
//!
//! `rho` is estimated by power iteration from a random positive start
//! vector. The [`CriticalityController`] then nudges `delta_state` and
//! `alpha0` so that `rho` settles near one.

use std::collections::{BTreeMap, VecDeque};

use cascade_graph::GraphSnapshot;
use cascade_types::{ControllerState, EntityId, NodeId, SafetyState, TunedParams};
use rand::Rng;

use crate::config::{CriticalityConfig, DiffusionConfig};
use crate::math::{count_f64, variance};

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// One spectral-radius estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralEstimate {
    /// Estimated spectral radius (zero when invalid).
    pub rho: f64,
    /// False when the active subgraph was empty.
    pub valid: bool,
    /// Power-iteration steps taken.
    pub iterations: usize,
    /// Whether the estimate stabilized within tolerance.
    pub converged: bool,
    /// Size of the active subgraph.
    pub active_nodes: usize,
}

impl SpectralEstimate {
    const fn empty() -> Self {
        Self {
            rho: 0.0,
            valid: false,
            iterations: 0,
            converged: false,
            active_nodes: 0,
        }
    }
}

/// Estimate `rho(T)` over the nodes active in `channel`, or over nodes
/// active in any channel when `channel` is `None`.
pub fn estimate_rho<R: Rng>(
    graph: &GraphSnapshot,
    channel: Option<&EntityId>,
    params: TunedParams,
    diffusion: &DiffusionConfig,
    config: &CriticalityConfig,
    rng: &mut R,
) -> SpectralEstimate {
    let active: Vec<&NodeId> = graph
        .nodes()
        .filter(|(_, node)| node.complete)
        .filter(|(_, node)| {
            let energy = channel.map_or_else(|| node.total_energy(), |c| node.energy_in(c));
            energy > diffusion.epsilon
        })
        .map(|(id, _)| id)
        .collect();
    if active.is_empty() {
        return SpectralEstimate::empty();
    }

    let index: BTreeMap<&NodeId, usize> =
        active.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    // incoming[j] lists (i, w_ij) for links i -> j inside the active set.
    let mut incoming: Vec<Vec<(usize, f64)>> = vec![Vec::new(); active.len()];
    for (i, id) in active.iter().enumerate() {
        for link in graph.outgoing(id) {
            if link.link_type.is_inhibitory() || link.weight <= 0.0 {
                continue;
            }
            if let Some(slot) = index.get(&link.target).and_then(|&j| incoming.get_mut(j)) {
                slot.push((i, link.weight));
            }
        }
    }

    let alpha = diffusion.alpha_eff(params.alpha0, diffusion.dt_ref);
    let keep = (-params.delta_state * diffusion.dt_ref).exp();
    let apply = |x: &[f64]| -> Vec<f64> {
        incoming
            .iter()
            .zip(x)
            .map(|(sources, own)| {
                let spread: f64 = sources
                    .iter()
                    .map(|(i, w)| w * x.get(*i).copied().unwrap_or(0.0))
                    .sum();
                keep * (1.0 - alpha).mul_add(*own, alpha * spread)
            })
            .collect()
    };

    let mut x: Vec<f64> = (0..active.len())
        .map(|_| rng.random::<f64>() + 0.1)
        .collect();
    normalize(&mut x);

    let mut estimate = SpectralEstimate {
        active_nodes: active.len(),
        valid: true,
        ..SpectralEstimate::empty()
    };
    let mut previous: Option<f64> = None;
    for step in 1..=config.power_iterations {
        let y = apply(&x);
        // Rayleigh quotient with a unit-norm x.
        let lambda: f64 = x.iter().zip(&y).map(|(a, b)| a * b).sum();
        estimate.rho = lambda.abs();
        estimate.iterations = step;
        x = y;
        if normalize(&mut x) <= 0.0 {
            estimate.rho = 0.0;
            estimate.converged = true;
            break;
        }
        if let Some(prev) = previous
            && (lambda - prev).abs() <= config.convergence_tolerance * lambda.abs().max(1.0)
        {
            estimate.converged = true;
            break;
        }
        previous = Some(lambda);
    }
    estimate
}

/// Scale `x` to unit norm and return the original norm.
fn normalize(x: &mut [f64]) -> f64 {
    let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in x.iter_mut() {
            *v /= norm;
        }
        norm
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// What the controller did in one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    /// Parameters before the update.
    pub before: TunedParams,
    /// Parameters after the update.
    pub after: TunedParams,
    /// Whether the parameters were changed.
    pub adjusted: bool,
}

/// Positional PI controller holding `rho` near one.
///
/// The error `e = rho - 1` feeds a clamped integral `I`; the output
/// `u = kp e + ki I` sets targets `delta = delta_base + delta_gain u` and
/// `alpha0 = alpha_base - alpha_gain u`, each clamped to its admissible
/// range. Parameters step toward their targets by at most `max_step` per
/// tick. Errors inside the dead band leave everything unchanged.
#[derive(Debug, Clone)]
pub struct CriticalityController {
    config: CriticalityConfig,
    base: TunedParams,
    rho_window: VecDeque<f64>,
    error_window: VecDeque<f64>,
}

impl CriticalityController {
    /// Create a controller anchored at the starting parameters.
    pub fn new(config: CriticalityConfig, base: TunedParams) -> Self {
        let base = config.clamp_params(base);
        Self {
            config,
            base,
            rho_window: VecDeque::new(),
            error_window: VecDeque::new(),
        }
    }

    /// Controller configuration.
    pub const fn config(&self) -> &CriticalityConfig {
        &self.config
    }

    /// Feed one estimate and retune `params` in place.
    pub fn update(
        &mut self,
        estimate: &SpectralEstimate,
        state: &mut ControllerState,
        params: &mut TunedParams,
    ) -> Adjustment {
        let before = *params;
        let unchanged = Adjustment {
            before,
            after: before,
            adjusted: false,
        };
        if !estimate.valid || !estimate.rho.is_finite() {
            return unchanged;
        }

        let error = estimate.rho - 1.0;
        push_bounded(&mut self.rho_window, estimate.rho, self.config.window);
        push_bounded(&mut self.error_window, error, self.config.window);
        state.last_error = error;

        if !self.config.enabled || error.abs() <= self.config.tolerance {
            return unchanged;
        }

        let limit = self.config.integral_max;
        state.integral = (state.integral + error).max(-limit).min(limit);
        let output = self.config.kp.mul_add(error, self.config.ki * state.integral);
        state.last_output = output;

        let target = self.config.clamp_params(TunedParams {
            alpha0: self.config.alpha_gain.mul_add(-output, self.base.alpha0),
            delta_state: self.config.delta_gain.mul_add(output, self.base.delta_state),
        });
        let step = self.config.max_step;
        *params = self.config.clamp_params(TunedParams {
            alpha0: params.alpha0 + (target.alpha0 - params.alpha0).max(-step).min(step),
            delta_state: params.delta_state
                + (target.delta_state - params.delta_state).max(-step).min(step),
        });
        state.adjustments = state.adjustments.saturating_add(1);

        tracing::debug!(
            rho = estimate.rho,
            integral = state.integral,
            output,
            alpha0 = params.alpha0,
            delta_state = params.delta_state,
            "Criticality controller adjusted parameters"
        );
        Adjustment {
            before,
            after: *params,
            adjusted: true,
        }
    }

    /// Variance of the recent `rho` estimates.
    pub fn rho_variance(&self) -> f64 {
        let values: Vec<f64> = self.rho_window.iter().copied().collect();
        variance(&values)
    }

    /// Fraction of consecutive error pairs that changed sign, in [0, 1].
    pub fn oscillation_index(&self) -> f64 {
        let signs: Vec<bool> = self
            .error_window
            .iter()
            .filter(|e| e.abs() > self.config.tolerance)
            .map(|e| *e > 0.0)
            .collect();
        if signs.len() < 2 {
            return 0.0;
        }
        let flips = signs.windows(2).filter(|w| w.first() != w.last()).count();
        count_f64(flips) / count_f64(signs.len().saturating_sub(1))
    }

    /// Regime classification of an estimate.
    pub fn safety(estimate: &SpectralEstimate) -> SafetyState {
        if estimate.valid {
            SafetyState::classify(estimate.rho)
        } else {
            SafetyState::Dying
        }
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, capacity: usize) {
    window.push_back(value);
    while window.len() > capacity {
        window.pop_front();
    }
}

/// Ratio of active nodes now to active nodes on the previous tick.
pub fn branching_ratio(active_now: usize, active_before: usize) -> f64 {
    if active_before == 0 {
        return 0.0;
    }
    count_f64(active_now) / count_f64(active_before)
}
