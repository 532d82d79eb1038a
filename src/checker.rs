use crate::models::{CheckStatus, Service};
use crate::version::detect_version;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const CHECK_USER_AGENT: &str = "ServiceReliabilityMonitor/1.0";
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// What a single probe observed, before it is tied to a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub latency_ms: Option<u64>,
    pub detected_version: Option<String>,
    pub error_message: Option<String>,
}

/// Issues one bounded GET per service and classifies the result.
#[derive(Clone)]
pub struct Checker {
    client: Client,
    timeout: Duration,
}

impl Checker {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probes `service.url` once. Failures are folded into the outcome and
    /// never returned as errors.
    pub async fn check(&self, service: &Service) -> CheckOutcome {
        let start = Instant::now();
        let request = self
            .client
            .get(&service.url)
            .header(reqwest::header::USER_AGENT, CHECK_USER_AGENT)
            .timeout(self.timeout);

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let latency = elapsed_ms(start);
                let message = if err.is_timeout() {
                    format!("Request timed out after {}ms", self.timeout.as_millis())
                } else {
                    err.to_string()
                };
                warn!("Request failure for {}: {message}", service.name);
                return CheckOutcome {
                    status: CheckStatus::Error,
                    latency_ms: Some(latency),
                    detected_version: None,
                    error_message: Some(message),
                };
            }
        };

        let latency = elapsed_ms(start);
        let status = response.status();
        let headers = response.headers().clone();
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));

        let body = if is_json {
            match response.json::<Value>().await {
                Ok(body) => Some(body),
                Err(err) => {
                    debug!("Ignoring unreadable JSON body from {}: {err}", service.name);
                    None
                }
            }
        } else {
            None
        };

        let detected_version = detect_version(&headers, body.as_ref());

        if status.is_success() || status.is_redirection() {
            CheckOutcome {
                status: CheckStatus::Up,
                latency_ms: Some(latency),
                detected_version,
                error_message: None,
            }
        } else {
            CheckOutcome {
                status: CheckStatus::Down,
                latency_ms: Some(latency),
                detected_version,
                error_message: Some(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown Status")
                )),
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
