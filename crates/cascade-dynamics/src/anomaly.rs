//! Collection of tolerated steady-state anomalies.
//!
//! Mechanisms push an [`Anomaly`] whenever they skip or repair something
//! instead of failing. Each anomaly is logged at `warn` level as it is
//! recorded; the tick cycle drains the log into its result.

use cascade_types::Anomaly;

/// Anomalies recorded during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyLog {
    entries: Vec<Anomaly>,
}

impl AnomalyLog {
    /// Create an empty log.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Log and keep an anomaly.
    pub fn record(&mut self, anomaly: Anomaly) {
        match &anomaly {
            Anomaly::DataIncomplete { element, detail } => {
                tracing::warn!(kind = anomaly.kind(), element = %element, detail = %detail, "Skipping incomplete data");
            }
            Anomaly::NumericalAnomaly {
                node,
                entity,
                value,
            } => {
                tracing::warn!(kind = anomaly.kind(), node = %node, entity = %entity, value = %value, "Energy reset to zero");
            }
            Anomaly::InvalidTimeStep { dt } => {
                tracing::warn!(kind = anomaly.kind(), dt = %dt, "Ignoring invalid time step");
            }
            Anomaly::CapacityExceeded { resource, element } => {
                tracing::warn!(kind = anomaly.kind(), resource = ?resource, element = %element, "Capacity exceeded");
            }
            Anomaly::DuplicateCollision { existing } => {
                tracing::warn!(kind = anomaly.kind(), existing = %existing, "Merged duplicate link request");
            }
        }
        self.entries.push(anomaly);
    }

    /// Number of recorded anomalies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of anomalies of one kind.
    pub fn count_kind(&self, kind: &str) -> usize {
        self.entries.iter().filter(|a| a.kind() == kind).count()
    }

    /// Iterate over the recorded anomalies.
    pub fn iter(&self) -> impl Iterator<Item = &Anomaly> {
        self.entries.iter()
    }

    /// Take every recorded anomaly, leaving the log empty.
    pub fn drain(&mut self) -> Vec<Anomaly> {
        std::mem::take(&mut self.entries)
    }
}
