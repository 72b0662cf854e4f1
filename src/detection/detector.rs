use crate::ai::IncidentAnalyzer;
use crate::config::DetectionConfig;
use crate::detection::rules::{Breach, DetectionRule, LatencyRule, ServerErrorRule};
use crate::events::{Incident, IncidentStatus, Observation, Severity};
use crate::store::IncidentStore;
use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Turns threshold breaches into persisted incidents
///
/// Rules are evaluated in registration order. When several rules breach on
/// the same observation a single incident is opened: its type, value and
/// threshold come from the first breach, its severity is the highest of all
/// breaches.
pub struct AnomalyDetector {
    rules: Vec<Box<dyn DetectionRule>>,
    affected_endpoint: String,
    incidents: Arc<IncidentStore>,
    analyzer: Option<Arc<IncidentAnalyzer>>,
}

impl AnomalyDetector {
    /// Create a detector with no rules
    pub fn new(affected_endpoint: impl Into<String>, incidents: Arc<IncidentStore>) -> Self {
        Self {
            rules: Vec::new(),
            affected_endpoint: affected_endpoint.into(),
            incidents,
            analyzer: None,
        }
    }

    /// Create a detector with the latency rule followed by the server error rule
    pub fn from_config(
        config: &DetectionConfig,
        affected_endpoint: impl Into<String>,
        incidents: Arc<IncidentStore>,
    ) -> Self {
        let mut detector = Self::new(affected_endpoint, incidents);
        detector.add_rule(Box::new(LatencyRule::new(
            config.latency_threshold_ms,
            Severity::Medium,
        )));
        detector.add_rule(Box::new(ServerErrorRule::new(
            config.error_status_threshold,
            Severity::High,
        )));
        detector
    }

    /// Hand every persisted incident to this analyzer
    pub fn with_analyzer(mut self, analyzer: Arc<IncidentAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn add_rule(&mut self, rule: Box<dyn DetectionRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Build the incident this observation would open, if any
    ///
    /// Has no side effects.
    pub fn evaluate(&self, observation: &Observation) -> Option<Incident> {
        let breaches: Vec<Breach> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let breach = rule.evaluate(observation);
                if breach.is_some() {
                    debug!("Rule '{}' breached on observation {}", rule.name(), observation.id);
                }
                breach
            })
            .collect();

        let severity = breaches.iter().map(|b| b.severity).max()?;
        let primary = breaches.into_iter().next()?;

        Some(Incident {
            id: Uuid::new_v4(),
            incident_type: primary.incident_type,
            severity,
            description: primary.description,
            affected_endpoint: self.affected_endpoint.clone(),
            detected_value: primary.detected_value,
            threshold: primary.threshold,
            root_cause_analysis: None,
            suggested_fix: None,
            status: IncidentStatus::Open,
            timestamp: observation.timestamp,
            observation_id: observation.id,
        })
    }

    /// Evaluate an observation, persist any resulting incident and start its analysis
    ///
    /// Analysis runs on a spawned task, so this must be called from within a
    /// Tokio runtime when an analyzer is attached. An incident that fails to
    /// persist is logged and not analyzed.
    pub fn inspect(&self, observation: &Observation) -> Option<Incident> {
        let incident = self.evaluate(observation)?;

        if let Err(e) = self.incidents.insert(incident.clone()) {
            error!("Failed to persist incident {}: {}", incident.id, e);
            return None;
        }

        warn!(
            "Incident {} opened: {} ({:?} severity)",
            incident.id, incident.description, incident.severity
        );

        match &self.analyzer {
            Some(analyzer) => {
                let analyzer = Arc::clone(analyzer);
                let pending = incident.clone();
                let observation = observation.clone();
                tokio::spawn(async move {
                    analyzer.analyze(pending, &observation).await;
                });
            }
            None => info!("No analyzer attached, incident {} left for review", incident.id),
        }

        Some(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{IncidentType, ProbeOrigin};
    use serde_json::Value;

    fn observation(status: u16, latency_ms: f64) -> Observation {
        Observation::new(status, latency_ms, Value::Null, Value::Null, "POST", ProbeOrigin::Scheduled)
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::from_config(
            &DetectionConfig::default(),
            "httpbin.org/anything",
            Arc::new(IncidentStore::new()),
        )
    }

    #[test]
    fn test_healthy_observation_opens_nothing() {
        let detector = detector();
        assert_eq!(detector.rule_count(), 2);
        assert!(detector.evaluate(&observation(200, 150.0)).is_none());
        assert!(detector.evaluate(&observation(404, 1999.0)).is_none());
    }

    #[test]
    fn test_slow_observation_opens_latency_incident() {
        let obs = observation(200, 2500.0);
        let incident = detector().evaluate(&obs).unwrap();

        assert_eq!(incident.incident_type, IncidentType::Latency);
        assert_eq!(incident.severity, Severity::Medium);
        assert_eq!(incident.detected_value, 2500.0);
        assert_eq!(incident.threshold, "> 2000ms");
        assert_eq!(incident.affected_endpoint, "httpbin.org/anything");
        assert_eq!(incident.status, IncidentStatus::Open);
        assert_eq!(incident.observation_id, obs.id);
        assert!(!incident.is_analyzed());
    }

    #[test]
    fn test_server_error_opens_high_severity_incident() {
        let incident = detector().evaluate(&observation(500, 120.0)).unwrap();

        assert_eq!(incident.incident_type, IncidentType::Error);
        assert_eq!(incident.severity, Severity::High);
        assert_eq!(incident.detected_value, 500.0);
        assert_eq!(incident.threshold, ">= 500");
        assert_eq!(incident.description, "Server error detected: 500");
    }

    #[test]
    fn test_double_breach_opens_single_incident() {
        let incident = detector().evaluate(&observation(503, 3000.0)).unwrap();

        assert_eq!(incident.incident_type, IncidentType::Latency);
        assert_eq!(incident.detected_value, 3000.0);
        assert_eq!(incident.severity, Severity::High);
    }

    #[test]
    fn test_inspect_persists_incident() {
        let incidents = Arc::new(IncidentStore::new());
        let detector = AnomalyDetector::from_config(
            &DetectionConfig::default(),
            "httpbin.org/anything",
            Arc::clone(&incidents),
        );

        assert!(detector.inspect(&observation(200, 10.0)).is_none());
        assert!(incidents.is_empty());

        let opened = detector.inspect(&observation(502, 10.0)).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents.get(opened.id), Some(opened));
    }

    #[test]
    fn test_custom_thresholds() {
        let config = DetectionConfig {
            latency_threshold_ms: 500.0,
            error_status_threshold: 400,
        };
        let detector = AnomalyDetector::from_config(&config, "api", Arc::new(IncidentStore::new()));

        let incident = detector.evaluate(&observation(404, 10.0)).unwrap();
        assert_eq!(incident.threshold, ">= 400");

        let incident = detector.evaluate(&observation(200, 600.0)).unwrap();
        assert_eq!(incident.threshold, "> 500ms");
    }
}
