//! Observation queries, statistics, the live event stream and manual probes

use super::{ApiError, AppState};
use crate::events::{parse_timestamp, Timestamp};
use crate::store::{ObservationFilter, ObservationStats, StatusFilter};
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Query string shared by `/observations` and `/stats`
///
/// Values arrive as raw strings so malformed input maps to a 400 with a
/// useful message instead of a generic rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub page: Option<String>,
    #[serde(alias = "limit")]
    pub page_size: Option<String>,
}

impl ObservationParams {
    pub fn filter(&self) -> Result<ObservationFilter, ApiError> {
        let status = non_empty(&self.status)
            .map(|s| s.parse::<StatusFilter>().map_err(ApiError::BadRequest))
            .transpose()?;

        Ok(ObservationFilter {
            start: date_param("startDate", &self.start_date)?,
            end: date_param("endDate", &self.end_date)?,
            status,
            min_latency_ms: None,
        })
    }

    /// 1-based page and page size, with defaults applied
    pub fn pagination(&self) -> Result<(usize, usize), ApiError> {
        let page = count_param("page", &self.page)?.unwrap_or(1).max(1);
        let page_size = count_param("pageSize", &self.page_size)?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Ok((page, page_size))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn date_param(name: &str, value: &Option<String>) -> Result<Option<Timestamp>, ApiError> {
    non_empty(value)
        .map(|raw| {
            parse_timestamp(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid {}: '{}'", name, raw)))
        })
        .transpose()
}

fn count_param(name: &str, value: &Option<String>) -> Result<Option<usize>, ApiError> {
    non_empty(value)
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid {}: '{}'", name, raw)))
        })
        .transpose()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub pages: usize,
}

/// `GET /api/observations`
pub async fn list_observations(
    State(state): State<AppState>,
    Query(params): Query<ObservationParams>,
) -> Result<Json<Value>, ApiError> {
    let filter = params.filter()?;
    let (page, page_size) = params.pagination()?;
    let result = state.observations.query(&filter, page, page_size);

    let pagination = Pagination {
        total: result.total,
        page: result.page,
        page_size: result.page_size,
        pages: result.pages(),
    };
    Ok(Json(json!({ "data": result.items, "pagination": pagination })))
}

/// `GET /api/stats`
pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<ObservationParams>,
) -> Result<Json<ObservationStats>, ApiError> {
    let filter = params.filter()?;
    Ok(Json(state.observations.stats(&filter)))
}

/// `GET /api/events`
///
/// Each new observation is sent as one JSON event. The broadcaster
/// subscription lives inside the stream, so it is released when the client
/// disconnects.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, receiver) = state.broadcaster.subscribe_channel();
    debug!("Event stream client connected");

    let events = stream::unfold((receiver, subscription), |(mut receiver, subscription)| async move {
        loop {
            let observation = receiver.recv().await?;
            match Event::default().json_data(&observation) {
                Ok(event) => return Some((Ok(event), (receiver, subscription))),
                Err(e) => warn!("Failed to encode observation {}: {}", observation.id, e),
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// `POST /api/trigger`
///
/// Acknowledges immediately; the probe cycle runs detached.
pub async fn trigger_probe(State(state): State<AppState>) -> Json<Value> {
    let _ = state.scheduler.trigger();
    Json(json!({ "message": "Probe triggered" }))
}
