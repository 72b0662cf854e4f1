//! Core record types for the API health monitor
//!
//! This module defines the fundamental data structures that flow through the
//! pipeline: probe observations and the incidents derived from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Status codes below this value count as successful probes
pub const SUCCESS_STATUS_CEILING: u16 = 400;

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC)
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// One recorded outcome of probing the monitored endpoint
///
/// Observations are immutable once created. The status is either the HTTP
/// status returned by the target or a synthetic 500 when no response arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Unique identifier of this observation
    pub id: Uuid,
    /// When the probe completed
    pub timestamp: Timestamp,
    /// HTTP status code, or 500 for transport failures
    pub status: u16,
    /// Client-side latency in milliseconds, rounded to 2 decimals
    pub latency_ms: f64,
    /// Payload sent to the target
    pub request_payload: Value,
    /// Body returned by the target, or an error descriptor
    pub response_body: Value,
    /// HTTP method used for the probe
    pub method: String,
    /// Whether the probe was scheduled or triggered manually
    pub origin: ProbeOrigin,
}

impl Observation {
    /// Create a new observation stamped with the current time
    pub fn new(
        status: u16,
        latency_ms: f64,
        request_payload: Value,
        response_body: Value,
        method: impl Into<String>,
        origin: ProbeOrigin,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status,
            latency_ms,
            request_payload,
            response_body,
            method: method.into(),
            origin,
        }
    }

    /// Whether the probe counts as successful (status below 400)
    pub fn is_success(&self) -> bool {
        self.status < SUCCESS_STATUS_CEILING
    }
}

/// Source of a probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOrigin {
    /// Fired by the periodic timer
    Scheduled,
    /// Fired out-of-band through the trigger action
    Manual,
}

/// Category of a detected incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IncidentType {
    Latency,
    Error,
    Anomaly,
}

/// Severity of a detected incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Lifecycle state of an incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    /// Detected, not yet analyzed
    Open,
    /// Analysis produced a structured root cause and fix
    Investigating,
    /// Closed by an operator
    Resolved,
}

/// An anomaly condition derived from an observation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: String,
    pub affected_endpoint: String,
    /// The measured value that breached the threshold
    pub detected_value: f64,
    /// Human-readable breached condition, e.g. "> 2000ms"
    pub threshold: String,
    pub root_cause_analysis: Option<String>,
    pub suggested_fix: Option<String>,
    pub status: IncidentStatus,
    pub timestamp: Timestamp,
    /// Observation that opened this incident
    pub observation_id: Uuid,
}

impl Incident {
    /// Whether the analyzer has already written some analysis text
    pub fn is_analyzed(&self) -> bool {
        self.root_cause_analysis.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_incident() -> Incident {
        Incident {
            id: Uuid::new_v4(),
            incident_type: IncidentType::Latency,
            severity: Severity::Medium,
            description: "High latency detected: 2500ms".to_string(),
            affected_endpoint: "httpbin.org/anything".to_string(),
            detected_value: 2500.0,
            threshold: "> 2000ms".to_string(),
            root_cause_analysis: None,
            suggested_fix: None,
            status: IncidentStatus::Open,
            timestamp: Utc::now(),
            observation_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_observation_serializes_camel_case() {
        let observation = Observation::new(
            200,
            123.45,
            json!({"type": "login"}),
            json!({"ok": true}),
            "POST",
            ProbeOrigin::Scheduled,
        );

        let value = serde_json::to_value(&observation).unwrap();
        assert_eq!(value["latencyMs"], json!(123.45));
        assert_eq!(value["requestPayload"]["type"], json!("login"));
        assert_eq!(value["responseBody"]["ok"], json!(true));
        assert_eq!(value["origin"], json!("scheduled"));
    }

    #[test]
    fn test_parse_timestamp() {
        let parsed = parse_timestamp("2024-03-01T10:30:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T08:30:00+00:00");

        let date_only = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(date_only.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-01").is_none());
    }

    #[test]
    fn test_observation_success_boundary() {
        let mut observation = Observation::new(
            399,
            1.0,
            Value::Null,
            Value::Null,
            "POST",
            ProbeOrigin::Manual,
        );
        assert!(observation.is_success());

        observation.status = 400;
        assert!(!observation.is_success());
    }

    #[test]
    fn test_incident_serialization() {
        let incident = sample_incident();

        let value = serde_json::to_value(&incident).unwrap();
        assert_eq!(value["type"], json!("latency"));
        assert_eq!(value["severity"], json!("medium"));
        assert_eq!(value["status"], json!("open"));
        assert_eq!(value["rootCauseAnalysis"], Value::Null);

        let deserialized: Incident = serde_json::from_value(value).unwrap();
        assert_eq!(incident, deserialized);
        assert!(!deserialized.is_analyzed());
    }

    #[test]
    fn test_status_ordering() {
        assert!(IncidentStatus::Open < IncidentStatus::Investigating);
        assert!(IncidentStatus::Investigating < IncidentStatus::Resolved);
        assert!(Severity::Low < Severity::High);
    }
}
