use crate::ai::gateway::{AIGateway, GenerationRequest};
use crate::ai::json::extract_json;
use crate::error::AnalysisError;
use crate::events::{Incident, IncidentStatus, Observation};
use crate::store::IncidentStore;
use log::{error, info, warn};
use serde::Deserialize;
use std::sync::Arc;

/// What the model said about an incident
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The answer parsed as `{"rootCause": ..., "fix": ...}`
    Structured { root_cause: String, fix: String },
    /// Free text that could not be parsed
    Raw(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisDocument {
    root_cause: String,
    #[serde(default)]
    fix: String,
}

impl AnalysisOutcome {
    /// Interpret a model answer, tolerating code fences and surrounding prose
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<AnalysisDocument>(&extract_json(text)) {
            Ok(document) => AnalysisOutcome::Structured {
                root_cause: document.root_cause,
                fix: document.fix,
            },
            Err(e) => {
                warn!("Failed to parse analysis JSON: {}", e);
                AnalysisOutcome::Raw(text.to_string())
            }
        }
    }

    /// Write the analysis into an incident
    ///
    /// Only a structured answer moves an open incident to investigating; an
    /// incident already resolved keeps its status.
    pub fn apply_to(&self, incident: &mut Incident) {
        match self {
            AnalysisOutcome::Structured { root_cause, fix } => {
                incident.root_cause_analysis = Some(root_cause.clone());
                incident.suggested_fix = Some(fix.clone());
                if incident.status == IncidentStatus::Open {
                    incident.status = IncidentStatus::Investigating;
                }
            }
            AnalysisOutcome::Raw(text) => {
                incident.root_cause_analysis = Some(text.clone());
                incident.suggested_fix = None;
            }
        }
    }
}

/// Asks the AI gateway for a root cause and fix for each new incident
pub struct IncidentAnalyzer {
    gateway: Arc<AIGateway>,
    incidents: Arc<IncidentStore>,
}

impl IncidentAnalyzer {
    pub fn new(gateway: Arc<AIGateway>, incidents: Arc<IncidentStore>) -> Self {
        Self { gateway, incidents }
    }

    /// Build the analysis prompt for an incident and the observation behind it
    pub fn format_prompt(incident: &Incident, observation: &Observation) -> String {
        let headers = observation
            .response_body
            .get("headers")
            .map(|headers| headers.to_string())
            .unwrap_or_else(|| "none".to_string());
        let incident_type = format!("{:?}", incident.incident_type).to_lowercase();

        format!(
            r#"Analyze this API monitoring incident:
Type: {incident_type}
Description: {description}
Endpoint: {endpoint}
Detected value: {value} (threshold {threshold})
Response status: {status}
Response latency: {latency}ms
Response headers: {headers}

Provide a brief root cause analysis and a suggested fix. Return JSON format: {{ "rootCause": "...", "fix": "..." }}"#,
            incident_type = incident_type,
            description = incident.description,
            endpoint = incident.affected_endpoint,
            value = incident.detected_value,
            threshold = incident.threshold,
            status = observation.status,
            latency = observation.latency_ms,
            headers = headers,
        )
    }

    /// Analyze an incident, logging instead of returning failures
    ///
    /// Meant to run detached from the probe cycle.
    pub async fn analyze(&self, incident: Incident, observation: &Observation) {
        let id = incident.id;
        match self.try_analyze(incident, observation).await {
            Ok(updated) => info!(
                "Incident {} analyzed, status {:?}",
                updated.id, updated.status
            ),
            Err(e) => error!("Incident {} analysis failed: {}", id, e),
        }
    }

    /// Analyze an incident and persist the result
    ///
    /// A gateway failure leaves the stored incident untouched. An answer that
    /// is not valid analysis JSON is stored as raw text.
    pub async fn try_analyze(
        &self,
        incident: Incident,
        observation: &Observation,
    ) -> Result<Incident, AnalysisError> {
        let prompt = Self::format_prompt(&incident, observation);
        let response = self
            .gateway
            .generate(&GenerationRequest::incident_analysis(prompt))
            .await?;

        let outcome = AnalysisOutcome::parse(&response.text);

        // Applied to the stored version so an operator's resolution sticks
        let updated = self
            .incidents
            .modify(incident.id, |stored| outcome.apply_to(stored))?;
        Ok(updated)
    }
}
