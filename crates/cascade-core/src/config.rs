//! Configuration loading and typed config structures for the Cascade engine.
//!
//! The canonical configuration lives in `cascade-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads, overrides, and validates the
//! file. Mechanism parameters live in the `dynamics` section and are typed by
//! [`DynamicsConfig`].

use std::path::{Path, PathBuf};

use cascade_dynamics::{DynamicsConfig, ParameterError};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A parameter is outside its admissible range.
    #[error("invalid configuration: {source}")]
    Invalid {
        /// The failed check.
        #[from]
        source: ParameterError,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `cascade-config.yaml`. Every section has
/// defaults, so an empty file yields a runnable configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Mechanism parameters.
    #[serde(default)]
    pub dynamics: DynamicsConfig,

    /// Tick scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Graph store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CASCADE_SNAPSHOT_PATH` overrides `store.snapshot_path`
    /// - `CASCADE_LOG_LEVEL` overrides `logging.level`
    /// - `CASCADE_LOG_FORMAT` overrides `logging.format` (`pretty` or `json`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a parameter is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a parameter is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CASCADE_SNAPSHOT_PATH") {
            self.store.snapshot_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CASCADE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CASCADE_LOG_FORMAT") {
            match val.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    /// Check every parameter against its admissible range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first failed check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dynamics.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

/// Tick scheduling configuration.
///
/// The wait between maintenance ticks grows with the time since the last
/// stimulus: `min_interval * (1 + since / knee) ^ exponent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    /// Wait right after a stimulus, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Time since stimulus at which the interval starts growing noticeably,
    /// in milliseconds.
    #[serde(default = "default_knee_ms")]
    pub knee_ms: u64,

    /// Growth exponent; smaller values grow more slowly.
    #[serde(default = "default_growth_exponent")]
    pub growth_exponent: f64,

    /// Capacity of the stimulus and reinforcement input queue.
    #[serde(default = "default_input_queue")]
    pub input_queue: usize,

    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ParameterError> {
        if self.min_interval_ms == 0 {
            return Err(ParameterError::Zero {
                name: "scheduler.min_interval_ms",
            });
        }
        if self.knee_ms == 0 {
            return Err(ParameterError::Zero {
                name: "scheduler.knee_ms",
            });
        }
        if self.input_queue == 0 {
            return Err(ParameterError::Zero {
                name: "scheduler.input_queue",
            });
        }
        if !(self.growth_exponent.is_finite() && self.growth_exponent > 0.0) {
            return Err(ParameterError::NotPositive {
                name: "scheduler.growth_exponent",
                value: self.growth_exponent,
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            knee_ms: default_knee_ms(),
            growth_exponent: default_growth_exponent(),
            input_queue: default_input_queue(),
            max_ticks: 0,
        }
    }
}

/// Graph store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// JSON seed graph loaded into the in-memory store.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Re-read the snapshot from the store every N ticks (0 = never).
    #[serde(default = "default_refresh_interval_ticks")]
    pub refresh_interval_ticks: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            refresh_interval_ticks: default_refresh_interval_ticks(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Whether every telemetry event is also logged at `info` level.
    #[serde(default = "default_true")]
    pub telemetry_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            telemetry_events: true,
        }
    }
}

const fn default_min_interval_ms() -> u64 {
    100
}

const fn default_knee_ms() -> u64 {
    1_000
}

const fn default_growth_exponent() -> f64 {
    0.75
}

const fn default_input_queue() -> usize {
    256
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/seed-graph.json")
}

const fn default_refresh_interval_ticks() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.min_interval_ms, 100);
        assert_eq!(config.store.refresh_interval_ticks, 50);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
dynamics:
  diffusion:
    alpha0: 0.2
    e_max: 5.0
  decay:
    delta_state: 0.05
  criticality:
    kp: 0.4
    avalanche_band: [-2.0, -1.0]
  workspace:
    capacity: 4.0
  stimulus_split: threshold_gap

scheduler:
  min_interval_ms: 50
  knee_ms: 2000
  growth_exponent: 0.5

store:
  snapshot_path: "graphs/test.json"
  refresh_interval_ticks: 10

logging:
  level: "debug"
  format: json
"#;

        let config = EngineConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert!((config.dynamics.diffusion.alpha0 - 0.2).abs() < f64::EPSILON);
        assert!((config.dynamics.diffusion.e_max - 5.0).abs() < f64::EPSILON);
        assert!((config.dynamics.criticality.kp - 0.4).abs() < f64::EPSILON);
        assert!((config.dynamics.workspace.capacity - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.scheduler.knee_ms, 2000);
        assert_eq!(config.store.refresh_interval_ticks, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
        // Untouched keys keep their defaults.
        assert!((config.dynamics.criticality.ki - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_minimal_and_empty_yaml() {
        let config = EngineConfig::parse("scheduler:\n  max_ticks: 7\n");
        assert!(config.as_ref().is_ok_and(|c| c.scheduler.max_ticks == 7));
        assert!(EngineConfig::parse("").is_ok());
    }

    #[test]
    fn malformed_gains_are_fatal() {
        let yaml = "dynamics:\n  criticality:\n    kp: -1.0\n";
        let result = EngineConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let yaml = "scheduler:\n  growth_exponent: 0.0\n";
        assert!(matches!(
            EngineConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let result = EngineConfig::parse("dynamics: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("cascade-config.yaml");
        if path.exists() {
            let config = EngineConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
