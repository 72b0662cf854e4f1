//! Built-in detection rules
//!
//! Each rule inspects a single observation and reports a breach when its
//! threshold is crossed.

use crate::events::{IncidentType, Observation, Severity};

/// A threshold crossed by one observation
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub detected_value: f64,
    /// Human-readable breached condition
    pub threshold: String,
    pub description: String,
}

/// Trait for rules evaluated against every observation
pub trait DetectionRule: Send + Sync {
    /// Return a breach if this observation violates the rule
    fn evaluate(&self, observation: &Observation) -> Option<Breach>;

    /// Get a human-readable name for this rule
    fn name(&self) -> &str;
}

/// Rule that fires when the probe latency exceeds a threshold
pub struct LatencyRule {
    /// Latencies strictly above this value breach
    pub threshold_ms: f64,
    pub severity: Severity,
}

impl LatencyRule {
    pub fn new(threshold_ms: f64, severity: Severity) -> Self {
        Self {
            threshold_ms,
            severity,
        }
    }

    /// 2000ms, medium severity
    pub fn with_defaults() -> Self {
        Self::new(2000.0, Severity::Medium)
    }
}

impl DetectionRule for LatencyRule {
    fn evaluate(&self, observation: &Observation) -> Option<Breach> {
        if observation.latency_ms <= self.threshold_ms {
            return None;
        }

        Some(Breach {
            incident_type: IncidentType::Latency,
            severity: self.severity,
            detected_value: observation.latency_ms,
            threshold: format!("> {}ms", self.threshold_ms),
            description: format!("High latency detected: {}ms", observation.latency_ms),
        })
    }

    fn name(&self) -> &str {
        "LatencyRule"
    }
}

/// Rule that fires when the probe status is at or above a threshold
pub struct ServerErrorRule {
    pub min_status: u16,
    pub severity: Severity,
}

impl ServerErrorRule {
    pub fn new(min_status: u16, severity: Severity) -> Self {
        Self {
            min_status,
            severity,
        }
    }

    /// Status >= 500, high severity
    pub fn with_defaults() -> Self {
        Self::new(500, Severity::High)
    }
}

impl DetectionRule for ServerErrorRule {
    fn evaluate(&self, observation: &Observation) -> Option<Breach> {
        if observation.status < self.min_status {
            return None;
        }

        Some(Breach {
            incident_type: IncidentType::Error,
            severity: self.severity,
            detected_value: f64::from(observation.status),
            threshold: format!(">= {}", self.min_status),
            description: format!("Server error detected: {}", observation.status),
        })
    }

    fn name(&self) -> &str {
        "ServerErrorRule"
    }
}
