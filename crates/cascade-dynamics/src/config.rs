//! Tunable parameters for every energy-dynamics mechanism.
//!
//! Each mechanism has its own config struct with documented defaults. The
//! engine loads them from the `dynamics` section of `cascade-config.yaml`
//! (missing keys fall back to [`Default`]) and validates the bundle once at
//! startup through [`DynamicsConfig::validate`].

use std::collections::BTreeMap;

use cascade_types::{LinkType, NodeType, StimulusSplit, TunedParams};
use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn positive(name: &'static str, value: f64) -> Result<(), ParameterError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParameterError::NotPositive { name, value })
    }
}

fn within(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ParameterError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

fn ordered(name: &'static str, min: f64, max: f64) -> Result<(), ParameterError> {
    if min <= max {
        Ok(())
    } else {
        Err(ParameterError::InvertedBounds { name, min, max })
    }
}

const fn nonzero(name: &'static str, value: usize) -> Result<(), ParameterError> {
    if value == 0 {
        Err(ParameterError::Zero { name })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Diffusion
// ---------------------------------------------------------------------------

/// How a source node splits its outflow among its outgoing links.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionRule {
    /// Shares proportional to link weight.
    #[default]
    WeightProportional,
    /// Shares proportional to link weight, tilted by the channel's learned
    /// valence on each link.
    ValenceBiased {
        /// Strength of the valence tilt, in [0, 1].
        bias: f64,
    },
}

/// Parameters of the diffusion stride and of node activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    /// Starting mixing base per reference interval (default: 0.1).
    pub alpha0: f64,
    /// Upper bound on the effective mixing coefficient (default: 0.5).
    pub alpha_max: f64,
    /// Reference interval in seconds that `alpha0` is expressed per (default: 1.0).
    pub dt_ref: f64,
    /// Energy below which a node counts as inactive (default: 1e-6).
    pub epsilon: f64,
    /// Saturation ceiling per node and channel (default: 10.0).
    pub e_max: f64,
    /// Activation threshold for channels without a node override (default: 1.0).
    pub default_threshold: f64,
    /// Outflow split rule.
    pub transition: TransitionRule,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            alpha0: 0.1,
            alpha_max: 0.5,
            dt_ref: 1.0,
            epsilon: 1e-6,
            e_max: 10.0,
            default_threshold: 1.0,
            transition: TransitionRule::WeightProportional,
        }
    }
}

impl DiffusionConfig {
    /// Effective mixing coefficient for an interval of `dt` seconds.
    pub fn alpha_eff(&self, alpha0: f64, dt: f64) -> f64 {
        (alpha0 * dt / self.dt_ref)
            .min(self.alpha_max.min(1.0))
            .max(0.0)
    }

    fn validate(&self) -> Result<(), ParameterError> {
        within("diffusion.alpha0", self.alpha0, 0.0, 1.0)?;
        within("diffusion.alpha_max", self.alpha_max, 0.0, 1.0)?;
        positive("diffusion.dt_ref", self.dt_ref)?;
        positive("diffusion.epsilon", self.epsilon)?;
        positive("diffusion.e_max", self.e_max)?;
        positive("diffusion.default_threshold", self.default_threshold)?;
        if let TransitionRule::ValenceBiased { bias } = self.transition {
            within("diffusion.transition.bias", bias, 0.0, 1.0)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decay
// ---------------------------------------------------------------------------

/// Parameters of state decay and inhibition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Starting state decay rate per second (default: 0.03).
    pub delta_state: f64,
    /// Decay-rate multiplier per node type.
    pub type_multipliers: BTreeMap<NodeType, f64>,
    /// Suppression strength of inhibitory links (default: 1.0).
    pub inhibition_gain: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            delta_state: 0.03,
            type_multipliers: NodeType::ALL
                .iter()
                .map(|&t| (t, default_type_multiplier(t)))
                .collect(),
            inhibition_gain: 1.0,
        }
    }
}

const fn default_type_multiplier(node_type: NodeType) -> f64 {
    match node_type {
        NodeType::Concept => 1.0,
        NodeType::Memory => 0.5,
        NodeType::Task => 2.0,
        NodeType::Goal => 0.25,
        NodeType::Percept => 1.5,
    }
}

impl DecayConfig {
    /// Multiplier for a node type (the built-in default when not configured).
    pub fn multiplier(&self, node_type: NodeType) -> f64 {
        self.type_multipliers
            .get(&node_type)
            .copied()
            .unwrap_or_else(|| default_type_multiplier(node_type))
    }

    fn validate(&self) -> Result<(), ParameterError> {
        positive("decay.delta_state", self.delta_state)?;
        for multiplier in self.type_multipliers.values() {
            positive("decay.type_multipliers", *multiplier)?;
        }
        within("decay.inhibition_gain", self.inhibition_gain, 0.0, f64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Criticality
// ---------------------------------------------------------------------------

/// Parameters of the spectral-radius estimate and the PI controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalityConfig {
    /// Whether the controller adjusts parameters at all (default: true).
    pub enabled: bool,
    /// Power-iteration steps per estimate (default: 10).
    pub power_iterations: usize,
    /// Relative eigenvalue change treated as converged (default: 1e-4).
    pub convergence_tolerance: f64,
    /// Seed for the power-iteration start vectors.
    pub seed: u64,
    /// Proportional gain (default: 0.5).
    pub kp: f64,
    /// Integral gain (default: 0.5).
    pub ki: f64,
    /// Absolute bound on the error integral (default: 20.0).
    pub integral_max: f64,
    /// Dead band around rho = 1 (default: 0.03).
    pub tolerance: f64,
    /// Largest change of either parameter per tick (default: 0.05).
    pub max_step: f64,
    /// Decay-rate response per unit of controller output (default: 0.5).
    pub delta_gain: f64,
    /// Mixing-base response per unit of controller output (default: 0.25).
    pub alpha_gain: f64,
    /// Lower bound on the state decay rate (default: 0.0005).
    pub delta_min: f64,
    /// Upper bound on the state decay rate (default: 2.0).
    pub delta_max: f64,
    /// Lower bound on the mixing base (default: 0.02).
    pub alpha_min: f64,
    /// Upper bound on the mixing base (default: 0.6).
    pub alpha_max: f64,
    /// Ticks of rho history kept for variance and oscillation (default: 32).
    pub window: usize,
    /// Completed cascades required before fitting an exponent (default: 20).
    pub min_cascades: usize,
    /// Healthy band for the fitted avalanche exponent (default: [-1.8, -1.2]).
    pub avalanche_band: (f64, f64),
}

impl Default for CriticalityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            power_iterations: 10,
            convergence_tolerance: 1e-4,
            seed: 0x00C0_FFEE,
            kp: 0.5,
            ki: 0.5,
            integral_max: 20.0,
            tolerance: 0.03,
            max_step: 0.05,
            delta_gain: 0.5,
            alpha_gain: 0.25,
            delta_min: 0.0005,
            delta_max: 2.0,
            alpha_min: 0.02,
            alpha_max: 0.6,
            window: 32,
            min_cascades: 20,
            avalanche_band: (-1.8, -1.2),
        }
    }
}

impl CriticalityConfig {
    /// Clamp parameters into the controller's admissible box.
    pub fn clamp_params(&self, params: TunedParams) -> TunedParams {
        TunedParams {
            alpha0: params.alpha0.max(self.alpha_min).min(self.alpha_max),
            delta_state: params.delta_state.max(self.delta_min).min(self.delta_max),
        }
    }

    fn validate(&self) -> Result<(), ParameterError> {
        nonzero("criticality.power_iterations", self.power_iterations)?;
        positive("criticality.convergence_tolerance", self.convergence_tolerance)?;
        within("criticality.kp", self.kp, 0.0, f64::MAX)?;
        within("criticality.ki", self.ki, 0.0, f64::MAX)?;
        positive("criticality.integral_max", self.integral_max)?;
        within("criticality.tolerance", self.tolerance, 0.0, 1.0)?;
        positive("criticality.max_step", self.max_step)?;
        positive("criticality.delta_min", self.delta_min)?;
        ordered("criticality.delta", self.delta_min, self.delta_max)?;
        positive("criticality.alpha_min", self.alpha_min)?;
        within("criticality.alpha_max", self.alpha_max, 0.0, 1.0)?;
        ordered("criticality.alpha", self.alpha_min, self.alpha_max)?;
        nonzero("criticality.window", self.window)?;
        nonzero("criticality.min_cascades", self.min_cascades)?;
        ordered(
            "criticality.avalanche_band",
            self.avalanche_band.0,
            self.avalanche_band.1,
        )
    }
}

// ---------------------------------------------------------------------------
// Plasticity
// ---------------------------------------------------------------------------

/// Weight bounds and slow decay for one link type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkTypeParams {
    /// Smallest admissible weight.
    pub w_min: f64,
    /// Largest admissible weight.
    pub w_max: f64,
    /// Weight decay rate per second.
    pub weight_decay: f64,
}

impl LinkTypeParams {
    /// Clamp a weight into the admissible range.
    pub fn clamp(&self, weight: f64) -> f64 {
        weight.max(self.w_min).min(self.w_max)
    }
}

/// Built-in bounds and decay rate for a link type.
pub const fn default_link_params(link_type: LinkType) -> LinkTypeParams {
    match link_type {
        LinkType::Semantic | LinkType::Causal | LinkType::Task => LinkTypeParams {
            w_min: 0.0,
            w_max: 1.0,
            weight_decay: 1e-4,
        },
        LinkType::Episodic => LinkTypeParams {
            w_min: 0.0,
            w_max: 1.0,
            weight_decay: 1e-6,
        },
        LinkType::Inhibitory => LinkTypeParams {
            w_min: -1.0,
            w_max: 0.0,
            weight_decay: 1e-5,
        },
    }
}

/// Parameters of weight learning, link creation, and reinforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlasticityConfig {
    /// Learning rate for links outside the workspace (default: 0.05).
    pub learning_rate: f64,
    /// Learning-rate factor when an endpoint was in the workspace (default: 5.0).
    pub workspace_boost: f64,
    /// Affective modulation strength (default: 0.3).
    pub affect_kappa: f64,
    /// Floor on the affective multiplier (default: 0.6).
    pub affect_floor: f64,
    /// Smoothing factor for traversal statistics (default: 0.1).
    pub traversal_beta: f64,
    /// Bounds and decay per link type.
    pub link_types: BTreeMap<LinkType, LinkTypeParams>,
    /// Links that may be created per budget period (default: 16).
    pub link_budget: u32,
    /// Length of a budget period in ticks (default: 10).
    pub budget_period_ticks: u64,
    /// Largest out-degree a node may reach by link creation (default: 32).
    pub max_out_degree: usize,
    /// Ticks an unreinforced new link survives (default: 100).
    pub probation_ticks: u64,
    /// Smoothing factor for reinforcement (default: 0.1).
    pub reinforcement_beta: f64,
    /// Weight change per unit of smoothed reinforcement (default: 0.05).
    pub reinforcement_rate: f64,
}

impl Default for PlasticityConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            workspace_boost: 5.0,
            affect_kappa: 0.3,
            affect_floor: 0.6,
            traversal_beta: 0.1,
            link_types: LinkType::ALL
                .iter()
                .map(|&t| (t, default_link_params(t)))
                .collect(),
            link_budget: 16,
            budget_period_ticks: 10,
            max_out_degree: 32,
            probation_ticks: 100,
            reinforcement_beta: 0.1,
            reinforcement_rate: 0.05,
        }
    }
}

impl PlasticityConfig {
    /// Parameters for a link type (the built-in default when not configured).
    pub fn link_params(&self, link_type: LinkType) -> LinkTypeParams {
        self.link_types
            .get(&link_type)
            .copied()
            .unwrap_or_else(|| default_link_params(link_type))
    }

    fn validate(&self) -> Result<(), ParameterError> {
        within("plasticity.learning_rate", self.learning_rate, 0.0, 1.0)?;
        positive("plasticity.workspace_boost", self.workspace_boost)?;
        within("plasticity.affect_kappa", self.affect_kappa, 0.0, 1.0)?;
        within("plasticity.affect_floor", self.affect_floor, 0.0, 1.0)?;
        within("plasticity.traversal_beta", self.traversal_beta, 0.0, 1.0)?;
        for params in self.link_types.values() {
            ordered("plasticity.link_types", params.w_min, params.w_max)?;
            within("plasticity.link_types.weight_decay", params.weight_decay, 0.0, f64::MAX)?;
        }
        if self.budget_period_ticks == 0 {
            return Err(ParameterError::Zero {
                name: "plasticity.budget_period_ticks",
            });
        }
        nonzero("plasticity.max_out_degree", self.max_out_degree)?;
        within("plasticity.reinforcement_beta", self.reinforcement_beta, 0.0, 1.0)?;
        within("plasticity.reinforcement_rate", self.reinforcement_rate, 0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Emergence
// ---------------------------------------------------------------------------

/// What happens when two candidate clusters both claim one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityConflictPolicy {
    /// The more coherent cluster keeps the identity; the other becomes a
    /// new entity with a derived id if it clears the emergence band.
    #[default]
    Split,
    /// The more coherent cluster keeps the identity; the other is dropped.
    DeactivateWeaker,
}

/// Parameters of entity emergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergenceConfig {
    /// Weight of link density in coherence (default: 0.4).
    pub density_weight: f64,
    /// Weight of embedding tightness in coherence (default: 0.3).
    pub tightness_weight: f64,
    /// Weight of co-activation in coherence (default: 0.3).
    pub coactivation_weight: f64,
    /// Standard deviations above the median score for the threshold (default: 2.0).
    pub sigma_k: f64,
    /// Floor for the emergence threshold (default: 0.5).
    pub min_threshold: f64,
    /// Candidates needed before the statistical threshold applies (default: 5).
    pub min_candidates: usize,
    /// Maximum simultaneously active entities (default: 8).
    pub max_entities: usize,
    /// An entity persists while its score exceeds this fraction of the
    /// threshold (default: 0.9).
    pub persist_ratio: f64,
    /// A new entity emerges once its score exceeds this multiple of the
    /// threshold (default: 1.1).
    pub emerge_ratio: f64,
    /// Fraction of an entity's members a cluster must cover to match it (default: 0.5).
    pub match_overlap: f64,
    /// Energy samples kept per node for co-activation (default: 16).
    pub history_len: usize,
    /// Conflict resolution when two clusters claim one entity.
    pub identity_conflict: IdentityConflictPolicy,
}

impl Default for EmergenceConfig {
    fn default() -> Self {
        Self {
            density_weight: 0.4,
            tightness_weight: 0.3,
            coactivation_weight: 0.3,
            sigma_k: 2.0,
            min_threshold: 0.5,
            min_candidates: 5,
            max_entities: 8,
            persist_ratio: 0.9,
            emerge_ratio: 1.1,
            match_overlap: 0.5,
            history_len: 16,
            identity_conflict: IdentityConflictPolicy::Split,
        }
    }
}

impl EmergenceConfig {
    fn validate(&self) -> Result<(), ParameterError> {
        within("emergence.density_weight", self.density_weight, 0.0, 1.0)?;
        within("emergence.tightness_weight", self.tightness_weight, 0.0, 1.0)?;
        within("emergence.coactivation_weight", self.coactivation_weight, 0.0, 1.0)?;
        within("emergence.sigma_k", self.sigma_k, 0.0, f64::MAX)?;
        positive("emergence.min_threshold", self.min_threshold)?;
        nonzero("emergence.min_candidates", self.min_candidates)?;
        nonzero("emergence.max_entities", self.max_entities)?;
        positive("emergence.persist_ratio", self.persist_ratio)?;
        ordered("emergence.hysteresis", self.persist_ratio, self.emerge_ratio)?;
        within("emergence.match_overlap", self.match_overlap, 0.0, 1.0)?;
        nonzero("emergence.history_len", self.history_len)
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Parameters of workspace selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Capacity budget in cost units (default: 7.0).
    pub capacity: f64,
    /// Similarity at or above which two candidates are duplicates (default: 0.95).
    ///
    /// Similarity averages footprint overlap with embedding cosine. A
    /// candidate without an embedding scores at most 0.5, so with the
    /// default it is never folded into another.
    pub duplicate_similarity: f64,
    /// Bound on the log-weight z-score (default: 3.0).
    pub z_clamp: f64,
    /// Smallest cost a candidate is charged (default: 0.001).
    pub min_cost: f64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            capacity: 7.0,
            duplicate_similarity: 0.95,
            z_clamp: 3.0,
            min_cost: 0.001,
        }
    }
}

impl WorkspaceConfig {
    fn validate(&self) -> Result<(), ParameterError> {
        within("workspace.capacity", self.capacity, 0.0, f64::MAX)?;
        within("workspace.duplicate_similarity", self.duplicate_similarity, 0.0, 1.0)?;
        positive("workspace.z_clamp", self.z_clamp)?;
        positive("workspace.min_cost", self.min_cost)
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Every dynamics parameter, grouped by mechanism.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    /// Diffusion and activation.
    pub diffusion: DiffusionConfig,
    /// State decay and inhibition.
    pub decay: DecayConfig,
    /// Spectral radius and controller.
    pub criticality: CriticalityConfig,
    /// Weight learning.
    pub plasticity: PlasticityConfig,
    /// Entity emergence.
    pub emergence: EmergenceConfig,
    /// Workspace selection.
    pub workspace: WorkspaceConfig,
    /// How stimulus budgets are split across entry nodes.
    pub stimulus_split: StimulusSplit,
}

impl DynamicsConfig {
    /// Check every parameter against its admissible range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParameterError`] found.
    pub fn validate(&self) -> Result<(), ParameterError> {
        self.diffusion.validate()?;
        self.decay.validate()?;
        self.criticality.validate()?;
        self.plasticity.validate()?;
        self.emergence.validate()?;
        self.workspace.validate()
    }

    /// The starting tunable parameters, clamped into the controller box.
    pub fn initial_params(&self) -> TunedParams {
        self.criticality.clamp_params(TunedParams {
            alpha0: self.diffusion.alpha0,
            delta_state: self.decay.delta_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DynamicsConfig::default().validate().is_ok());
    }

    #[test]
    fn alpha_eff_scales_and_caps() {
        let config = DiffusionConfig::default();
        assert!((config.alpha_eff(0.1, 1.0) - 0.1).abs() < 1e-12);
        assert!((config.alpha_eff(0.1, 2.0) - 0.2).abs() < 1e-12);
        assert!((config.alpha_eff(0.1, 100.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn inverted_controller_bounds_rejected() {
        let mut config = DynamicsConfig::default();
        config.criticality.alpha_min = 0.7;
        assert!(matches!(
            config.validate(),
            Err(ParameterError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn negative_threshold_rejected() {
        let mut config = DynamicsConfig::default();
        config.diffusion.default_threshold = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ParameterError::NotPositive { .. })
        ));
    }

    #[test]
    fn inhibitory_links_are_non_positive() {
        let params = PlasticityConfig::default().link_params(LinkType::Inhibitory);
        assert!((params.clamp(0.4) - 0.0).abs() < f64::EPSILON);
        assert!((params.clamp(-3.0) + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn episodic_links_decay_slowest() {
        let config = PlasticityConfig::default();
        let episodic = config.link_params(LinkType::Episodic).weight_decay;
        for link_type in LinkType::ALL {
            assert!(config.link_params(link_type).weight_decay >= episodic);
        }
    }

    #[test]
    fn memory_decays_slower_than_tasks() {
        let config = DecayConfig::default();
        assert!(config.multiplier(NodeType::Memory) < config.multiplier(NodeType::Task));
    }

    #[test]
    fn initial_params_are_clamped() {
        let mut config = DynamicsConfig::default();
        config.decay.delta_state = 10.0;
        let params = config.initial_params();
        assert!((params.delta_state - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{"diffusion": {"alpha0": 0.3}, "stimulus_split": "threshold_gap"}"#;
        let config: Option<DynamicsConfig> = serde_json::from_str(json).ok();
        assert!(config.as_ref().is_some_and(|c| (c.diffusion.alpha0 - 0.3).abs() < 1e-12));
        assert!(config.as_ref().is_some_and(|c| (c.diffusion.e_max - 10.0).abs() < 1e-12));
        assert_eq!(config.map(|c| c.stimulus_split), Some(StimulusSplit::ThresholdGap));
    }
}
