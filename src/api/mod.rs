//! HTTP query, stream and AI interface
//!
//! Every route is mounted under `/api`. CORS is permissive because the
//! dashboard is served from a different origin.

pub mod ai;
pub mod error;
pub mod observations;

pub use error::ApiError;

use crate::ai::AIGateway;
use crate::broadcast::Broadcaster;
use crate::scheduler::Scheduler;
use crate::store::{IncidentStore, ObservationStore};
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared handles the handlers operate on
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub observations: Arc<ObservationStore>,
    pub incidents: Arc<IncidentStore>,
    pub broadcaster: Broadcaster,
    pub gateway: Arc<AIGateway>,
}

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/observations", get(observations::list_observations))
        .route("/stats", get(observations::get_stats))
        .route("/events", get(observations::stream_events))
        .route("/trigger", post(observations::trigger_probe))
        .route("/ai/chat", post(ai::chat))
        .route("/ai/incidents", get(ai::list_incidents))
        .route("/ai/incidents/:id/resolve", post(ai::resolve_incident))
        .route("/ai/stats", get(ai::usage_stats));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
