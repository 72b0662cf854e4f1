use crate::config::ProbeConfig;
use crate::events::{Observation, ProbeOrigin};
use chrono::Utc;
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Event-type tags used in the synthetic probe payload
pub const PAYLOAD_EVENT_TYPES: [&str; 5] =
    ["purchase", "login", "logout", "view_page", "add_to_cart"];

/// Status recorded when the target produced no response at all
const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// Trait for anything that can produce one observation of the target
///
/// Probing never fails: transport problems are folded into the returned
/// observation so the caller always has something to record.
pub trait Probe: Send + Sync {
    fn probe<'a>(
        &'a self,
        origin: ProbeOrigin,
    ) -> Pin<Box<dyn Future<Output = Observation> + Send + 'a>>;
}

/// Probe that POSTs a synthetic event to the configured target
pub struct ProbeClient {
    client: Client,
    target_url: String,
    method: Method,
}

impl ProbeClient {
    /// Create a probe client for the given target URL
    ///
    /// # Arguments
    /// * `target_url` - Endpoint receiving the synthetic payload
    /// * `timeout` - Request timeout; expiry is recorded as a transport failure
    pub fn new(target_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            target_url,
            method: Method::POST,
        }
    }

    /// Create a probe client from the `[probe]` configuration section
    pub fn from_config(config: &ProbeConfig) -> Self {
        let mut probe = Self::new(
            config.target_url.clone(),
            Duration::from_secs(config.timeout_seconds),
        );
        match Method::from_bytes(config.method.to_uppercase().as_bytes()) {
            Ok(method) => probe.method = method,
            Err(_) => warn!(
                "Unknown probe method '{}', falling back to POST",
                config.method
            ),
        }
        probe
    }

    /// The URL being probed
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Build the synthetic event sent with every probe
    pub fn generate_payload() -> Value {
        let mut rng = rand::thread_rng();
        let event_type = PAYLOAD_EVENT_TYPES
            .choose(&mut rng)
            .copied()
            .unwrap_or("view_page");

        json!({
            "eventId": Uuid::new_v4().to_string(),
            "type": event_type,
            "value": rng.gen_range(0..1000),
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    /// Send one probe and normalize the outcome
    pub async fn send(&self, origin: ProbeOrigin) -> Observation {
        let payload = Self::generate_payload();
        let start = Instant::now();

        let result = self
            .client
            .request(self.method.clone(), &self.target_url)
            .json(&payload)
            .send()
            .await;

        let (status, body) = match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = match response.bytes().await {
                    Ok(bytes) => parse_body(&bytes),
                    Err(e) => json!({ "error": format!("Failed to read response body: {}", e) }),
                };
                (status, body)
            }
            Err(e) => {
                warn!("Probe of {} failed without a response: {}", self.target_url, e);
                (TRANSPORT_FAILURE_STATUS, json!({ "error": e.to_string() }))
            }
        };

        let latency_ms = round_to_hundredths(start.elapsed().as_secs_f64() * 1000.0);
        debug!(
            "Probe of {} finished: status={} latency={}ms",
            self.target_url, status, latency_ms
        );

        Observation::new(
            status,
            latency_ms,
            payload,
            body,
            self.method.as_str(),
            origin,
        )
    }
}

impl Probe for ProbeClient {
    fn probe<'a>(
        &'a self,
        origin: ProbeOrigin,
    ) -> Pin<Box<dyn Future<Output = Observation> + Send + 'a>> {
        Box::pin(self.send(origin))
    }
}

/// Keep JSON bodies structured and wrap anything else as a string
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_generate_payload_shape() {
        let payload = ProbeClient::generate_payload();

        assert!(Uuid::parse_str(payload["eventId"].as_str().unwrap()).is_ok());
        assert!(PAYLOAD_EVENT_TYPES.contains(&payload["type"].as_str().unwrap()));
        let value = payload["value"].as_i64().unwrap();
        assert!((0..1000).contains(&value));
        assert!(chrono::DateTime::parse_from_rfc3339(payload["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_round_to_hundredths() {
        assert_eq!(round_to_hundredths(12.3456), 12.35);
        assert_eq!(round_to_hundredths(0.004), 0.0);
        assert_eq!(round_to_hundredths(2500.0), 2500.0);
    }

    #[test]
    fn test_parse_body_variants() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(br#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(parse_body(b"<html>"), json!("<html>"));
    }

    #[tokio::test]
    async fn test_successful_probe_records_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/anything"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"headers": {"Host": "x"}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProbeClient::new(format!("{}/anything", server.uri()), Duration::from_secs(5));
        let observation = client.send(ProbeOrigin::Scheduled).await;

        assert_eq!(observation.status, 200);
        assert_eq!(observation.method, "POST");
        assert_eq!(observation.origin, ProbeOrigin::Scheduled);
        assert_eq!(observation.response_body["headers"]["Host"], json!("x"));
        assert!(observation.latency_ms >= 0.0);

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent, observation.request_payload);
    }

    #[tokio::test]
    async fn test_http_error_recorded_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = ProbeClient::new(server.uri(), Duration::from_secs(5));
        let observation = client.send(ProbeOrigin::Manual).await;

        assert_eq!(observation.status, 503);
        assert_eq!(observation.response_body, json!("upstream down"));
        assert!(!observation.is_success());
    }

    #[tokio::test]
    async fn test_transport_failure_synthesizes_500() {
        // Nothing listens on port 1
        let client = ProbeClient::new("http://127.0.0.1:1/".to_string(), Duration::from_secs(5));
        let observation = client.send(ProbeOrigin::Manual).await;

        assert_eq!(observation.status, 500);
        let error = observation.response_body["error"].as_str().unwrap();
        assert!(!error.is_empty());
    }

    #[test]
    fn test_from_config_method() {
        let config = ProbeConfig {
            method: "put".to_string(),
            ..ProbeConfig::default()
        };
        let client = ProbeClient::from_config(&config);
        assert_eq!(client.method, Method::PUT);
        assert_eq!(client.target_url(), "https://httpbin.org/anything");
    }
}
