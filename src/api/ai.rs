//! Chat, incident and usage endpoints

use super::{ApiError, AppState};
use crate::ai::{GatewayResponse, GenerationRequest, UsageTotals};
use crate::error::StoreError;
use crate::events::Incident;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use log::debug;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// `POST /api/ai/chat`
///
/// A missing, malformed or non-JSON body is treated like a missing prompt.
pub async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<GatewayResponse>, ApiError> {
    let request = request.map(|Json(request)| request).unwrap_or_else(|rejection| {
        debug!("Rejected chat body: {}", rejection.body_text());
        ChatRequest::default()
    });
    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Prompt is required".to_string()))?;

    let response = state.gateway.generate(&GenerationRequest::chat(prompt)).await?;
    Ok(Json(response))
}

/// `GET /api/ai/incidents`, newest first
pub async fn list_incidents(State(state): State<AppState>) -> Json<Vec<Incident>> {
    Json(state.incidents.list())
}

/// `POST /api/ai/incidents/:id/resolve`
pub async fn resolve_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>, ApiError> {
    match state.incidents.resolve(id) {
        Ok(incident) => Ok(Json(incident)),
        Err(StoreError::NotFound(_)) => Err(ApiError::NotFound(format!("Incident {} not found", id))),
        Err(e) => Err(e.into()),
    }
}

/// `GET /api/ai/stats`
pub async fn usage_stats(State(state): State<AppState>) -> Json<UsageTotals> {
    Json(state.gateway.usage_totals())
}
