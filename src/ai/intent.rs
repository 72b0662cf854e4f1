//! Two-stage answering of questions about recorded observations
//!
//! The first model pass turns a question into a query descriptor; the
//! descriptor is run against the observation store and the results are
//! folded into the prompt for the second pass.

use crate::ai::json::extract_json;
use crate::events::{parse_timestamp, Observation, ProbeOrigin, Timestamp};
use crate::store::{ObservationFilter, ObservationQuery, SortField, SortOrder, StatusFilter};
use chrono::Duration;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 20;

/// Records quoted verbatim in the answer prompt
const SAMPLE_RECORDS: usize = 5;

/// Prompt asking the model to translate a question into a query descriptor
pub fn query_generation_prompt(question: &str, now: Timestamp) -> String {
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
        .to_rfc3339();
    let last_24h = (now - Duration::hours(24)).to_rfc3339();

    format!(
        r#"You are a query generator for an API monitoring system.

Observation fields:
  * timestamp (RFC 3339) - when the probe ran
  * status (integer) - HTTP status code (200, 404, 500, ...)
  * latencyMs (number) - response time in milliseconds
  * method (string) - HTTP method
  * origin (string) - "scheduled" or "manual"

Rules:
1. Always generate a query if the user asks about probes, errors, performance, issues or system data
2. For "today": use "since": "{today}"
3. For "last 24 hours": use "since": "{last_24h}"
4. For "issues" or "errors": use "status": "error"
5. For "slow" or "performance": sort by latencyMs descending
6. Output only JSON: {{ "type": "find", "filter": {{ "since": ..., "until": ..., "status": "error" | "success" | <code>, "minStatus": <code>, "minLatencyMs": <ms> }}, "sort": {{ "field": "timestamp" | "latencyMs" | "status", "order": "asc" | "desc" }}, "limit": N }}
7. Default limit: {default_limit}. Max limit: {max_limit}
8. Return null only for greetings like "hello" or "hi"

Examples:
- "Summarize issues in last 24 hours" -> {{ "type": "find", "filter": {{ "since": "{last_24h}", "status": "error" }}, "sort": {{ "field": "timestamp", "order": "desc" }}, "limit": 20 }}
- "Slowest response times today" -> {{ "type": "find", "filter": {{ "since": "{today}" }}, "sort": {{ "field": "latencyMs", "order": "desc" }}, "limit": 10 }}

User question: "{question}"

Generate the query now:"#,
        today = today,
        last_24h = last_24h,
        default_limit = DEFAULT_LIMIT,
        max_limit = MAX_LIMIT,
        question = question,
    )
}

#[derive(Debug, Deserialize)]
struct QueryDescriptor {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    filter: DescriptorFilter,
    #[serde(default)]
    sort: Option<Value>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorFilter {
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    until: Option<String>,
    #[serde(default)]
    status: Option<StatusValue>,
    #[serde(default)]
    min_status: Option<u16>,
    #[serde(default)]
    min_latency_ms: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusValue {
    Code(u16),
    Named(String),
}

/// Interpret the first-pass answer as an observation query
///
/// Returns `None` when the model declined to query (`null`), produced
/// something other than a `find` descriptor, or produced unparseable text.
pub fn parse_descriptor(response_text: &str) -> Option<ObservationQuery> {
    let json = extract_json(response_text);
    let descriptor: Option<QueryDescriptor> = match serde_json::from_str(&json) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!("Failed to parse query descriptor: {}", e);
            return None;
        }
    };

    let descriptor = descriptor?;
    if descriptor.kind != "find" {
        debug!("Ignoring query descriptor of type '{}'", descriptor.kind);
        return None;
    }

    let filter = build_filter(&descriptor.filter);
    let (sort, order) = descriptor
        .sort
        .as_ref()
        .and_then(parse_sort)
        .unwrap_or((SortField::Timestamp, SortOrder::Descending));

    let limit = match descriptor.limit {
        Some(n) if n > 0 => (n as usize).min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    };

    Some(ObservationQuery {
        filter,
        sort,
        order,
        limit,
    })
}

fn build_filter(raw: &DescriptorFilter) -> ObservationFilter {
    let status = match &raw.status {
        Some(StatusValue::Code(code)) => Some(StatusFilter::Exact(*code)),
        Some(StatusValue::Named(name)) => name.parse().ok(),
        None => None,
    }
    .or(raw.min_status.map(StatusFilter::AtLeast));

    ObservationFilter {
        start: raw.since.as_deref().and_then(parse_timestamp),
        end: raw.until.as_deref().and_then(parse_timestamp),
        status,
        min_latency_ms: raw.min_latency_ms,
    }
}

/// Accepts `{"field": "latencyMs", "order": "desc"}` as well as the
/// single-key form `{"latencyMs": -1}`.
fn parse_sort(sort: &Value) -> Option<(SortField, SortOrder)> {
    let object = sort.as_object()?;
    let (field, order) = match object.get("field") {
        Some(field) => (field.as_str()?, object.get("order")),
        None => {
            let (field, order) = object.iter().next()?;
            (field.as_str(), Some(order))
        }
    };

    let field = match field {
        "timestamp" => SortField::Timestamp,
        "latencyMs" | "latency" => SortField::LatencyMs,
        "status" => SortField::Status,
        _ => return None,
    };

    let order = match order {
        Some(Value::String(s)) if s.starts_with("asc") => SortOrder::Ascending,
        Some(Value::Number(n)) if n.as_i64() == Some(1) => SortOrder::Ascending,
        _ => SortOrder::Descending,
    };

    Some((field, order))
}

/// Aggregate view of the records found for a question
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    pub total_records: usize,
    /// Distinct status codes in order of first appearance
    pub status_codes: Vec<u16>,
    pub avg_latency: u64,
    pub error_count: usize,
}

impl DataSummary {
    pub fn from_records(records: &[Observation]) -> Self {
        let mut status_codes = Vec::new();
        for record in records {
            if !status_codes.contains(&record.status) {
                status_codes.push(record.status);
            }
        }

        let avg_latency = if records.is_empty() {
            0
        } else {
            let sum: f64 = records.iter().map(|r| r.latency_ms).sum();
            (sum / records.len() as f64).round().max(0.0) as u64
        };

        Self {
            total_records: records.len(),
            status_codes,
            avg_latency,
            error_count: records.iter().filter(|r| !r.is_success()).count(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SampleRecord<'a> {
    timestamp: Timestamp,
    status: u16,
    latency_ms: f64,
    method: &'a str,
    origin: ProbeOrigin,
}

/// Answer prompt grounded in the records the descriptor matched
pub fn data_prompt(question: &str, records: &[Observation]) -> String {
    let summary = DataSummary::from_records(records);
    let samples: Vec<SampleRecord> = records
        .iter()
        .take(SAMPLE_RECORDS)
        .map(|r| SampleRecord {
            timestamp: r.timestamp,
            status: r.status,
            latency_ms: r.latency_ms,
            method: &r.method,
            origin: r.origin,
        })
        .collect();

    let summary_json = serde_json::to_string(&summary).unwrap_or_default();
    let samples_json = serde_json::to_string(&samples).unwrap_or_default();

    format!(
        r#"You are a monitoring system assistant. Answer the user's question based on actual recorded data.

User question: "{question}"

Recorded results ({count} records found):
Summary: {summary_json}
Sample records: {samples_json}

Instructions:
- Give a direct answer with specific numbers and timestamps
- Cite actual data points (e.g. "At 10:23, status 500 with 2500ms latency")
- If asked about issues, list them with details
- If asked about performance, mention specific latency values
- Be concise and actionable
- Do not ask for clarification; answer from the data provided"#,
        question = question,
        count = records.len(),
        summary_json = summary_json,
        samples_json = samples_json,
    )
}

/// Answer prompt for a query that matched nothing
pub fn no_data_prompt(question: &str) -> String {
    format!(
        r#"You are a monitoring system assistant.

User question: "{}"

The recorded data was searched but no matching records were found.

Respond by:
1. Confirming no data was found
2. Suggesting the system might be healthy or the time range might be different
3. Keeping it brief and positive"#,
        question
    )
}

/// Plain prompt used when no query applies
pub fn direct_prompt(system_context: &str, question: &str) -> String {
    format!("{}\n\nUser: {}", system_context, question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProbeOrigin;
    use chrono::{TimeZone, Utc};
    use serde_json::Value as Json;

    fn observation(status: u16, latency_ms: f64) -> Observation {
        Observation::new(status, latency_ms, Json::Null, Json::Null, "POST", ProbeOrigin::Scheduled)
    }

    #[test]
    fn test_query_generation_prompt_embeds_dates() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 15, 30, 0).unwrap();
        let prompt = query_generation_prompt("What errors occurred?", now);

        assert!(prompt.contains("2024-05-10T00:00:00+00:00"));
        assert!(prompt.contains("2024-05-09T15:30:00+00:00"));
        assert!(prompt.contains("User question: \"What errors occurred?\""));
    }

    #[test]
    fn test_parse_full_descriptor() {
        let text = r#"```json
{ "type": "find", "filter": { "since": "2024-05-09T15:30:00Z", "status": "error", "minLatencyMs": 1000 },
  "sort": { "field": "latencyMs", "order": "desc" }, "limit": 5 }
```"#;
        let query = parse_descriptor(text).unwrap();

        assert_eq!(
            query.filter.start,
            Some(Utc.with_ymd_and_hms(2024, 5, 9, 15, 30, 0).unwrap())
        );
        assert_eq!(query.filter.end, None);
        assert_eq!(query.filter.status, Some(StatusFilter::Error));
        assert_eq!(query.filter.min_latency_ms, Some(1000.0));
        assert_eq!(query.sort, SortField::LatencyMs);
        assert_eq!(query.order, SortOrder::Descending);
        assert_eq!(query.limit, 5);
    }

    #[test]
    fn test_parse_descriptor_defaults_and_cap() {
        let query = parse_descriptor(r#"{"type": "find"}"#).unwrap();
        assert_eq!(query.filter, ObservationFilter::default());
        assert_eq!(query.sort, SortField::Timestamp);
        assert_eq!(query.order, SortOrder::Descending);
        assert_eq!(query.limit, DEFAULT_LIMIT);

        let capped = parse_descriptor(r#"{"type": "find", "limit": 500}"#).unwrap();
        assert_eq!(capped.limit, MAX_LIMIT);

        let non_positive = parse_descriptor(r#"{"type": "find", "limit": 0}"#).unwrap();
        assert_eq!(non_positive.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_parse_descriptor_status_variants() {
        let exact = parse_descriptor(r#"{"type": "find", "filter": {"status": 404}}"#).unwrap();
        assert_eq!(exact.filter.status, Some(StatusFilter::Exact(404)));

        let at_least = parse_descriptor(r#"{"type": "find", "filter": {"minStatus": 500}}"#).unwrap();
        assert_eq!(at_least.filter.status, Some(StatusFilter::AtLeast(500)));

        let success = parse_descriptor(r#"{"type": "find", "filter": {"status": "success"}}"#).unwrap();
        assert_eq!(success.filter.status, Some(StatusFilter::Success));
    }

    #[test]
    fn test_parse_single_key_sort() {
        let query = parse_descriptor(r#"{"type": "find", "sort": {"status": 1}}"#).unwrap();
        assert_eq!(query.sort, SortField::Status);
        assert_eq!(query.order, SortOrder::Ascending);
    }

    #[test]
    fn test_no_descriptor() {
        assert!(parse_descriptor("null").is_none());
        assert!(parse_descriptor("Hello! How can I help?").is_none());
        assert!(parse_descriptor(r#"{"type": "aggregate"}"#).is_none());
        assert!(parse_descriptor(r#"{"filter": {}}"#).is_none());
    }

    #[test]
    fn test_data_summary() {
        let records = vec![
            observation(200, 100.0),
            observation(500, 300.0),
            observation(200, 201.0),
            observation(404, 0.0),
        ];
        let summary = DataSummary::from_records(&records);

        assert_eq!(summary.total_records, 4);
        assert_eq!(summary.status_codes, vec![200, 500, 404]);
        assert_eq!(summary.avg_latency, 150);
        assert_eq!(summary.error_count, 2);

        assert_eq!(DataSummary::from_records(&[]).avg_latency, 0);
    }

    #[test]
    fn test_data_prompt_limits_samples() {
        let records: Vec<Observation> = (0..8).map(|i| observation(500 + i, 10.0)).collect();
        let prompt = data_prompt("Any errors?", &records);

        assert!(prompt.contains("8 records found"));
        assert!(prompt.contains("\"totalRecords\":8"));
        assert!(prompt.contains("\"status\":504"));
        assert!(!prompt.contains("\"status\":505"));
    }

    #[test]
    fn test_fallback_prompts() {
        assert!(no_data_prompt("Errors today?").contains("no matching records"));
        assert_eq!(
            direct_prompt("You are a helpful monitoring assistant.", "hi"),
            "You are a helpful monitoring assistant.\n\nUser: hi"
        );
    }
}
