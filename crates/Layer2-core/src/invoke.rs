//! Resilient HTTP invocation with bounded retry
//!
//! Wraps outbound calls in exponential backoff with jitter, classifying
//! failures as retryable (network errors, HTTP 429, HTTP 5xx) or terminal
//! (other 4xx), under a hard per-attempt deadline.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tether_foundation::{format_error, ErrorCode, ErrorReport, RetryConfig};
use tracing::{debug, warn};

/// Outbound request description
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method (GET/POST/...)
    pub method: reqwest::Method,

    /// Additional request headers
    pub headers: HashMap<String, String>,

    /// JSON body (POST/PUT)
    pub body: Option<Value>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            method: reqwest::Method::GET,
            headers: HashMap::new(),
            body: None,
        }
    }
}

impl RequestSpec {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            headers: HashMap::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Result of a resilient fetch
///
/// Every outcome, success or failure, reports total attempts and elapsed
/// time so callers can reason about retry behavior.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Whether the request eventually succeeded (HTTP 2xx)
    pub ok: bool,

    /// Final HTTP status, if a response was received
    pub status: Option<u16>,

    /// Response body: parsed JSON when possible, raw text otherwise
    pub data: Option<Value>,

    /// Classified error code when `ok` is false
    pub error_code: Option<ErrorCode>,

    /// Human-readable error message
    pub error_message: Option<String>,

    /// Total attempts made (1-indexed)
    pub attempts: u32,

    /// Total elapsed time across all attempts and backoff
    pub elapsed_ms: u64,
}

impl FetchOutcome {
    /// User-facing report for a failed outcome
    pub fn report(&self) -> Option<ErrorReport> {
        let code = self.error_code?;
        let context = self.error_message.clone().unwrap_or_default();
        Some(format_error(code, &context))
    }
}

/// Classify a non-2xx status code
fn classify_status(status: u16) -> ErrorCode {
    match status {
        429 => ErrorCode::RateLimited,
        500..=599 => ErrorCode::ServerError,
        _ => ErrorCode::ClientError,
    }
}

/// Whether an HTTP status warrants another attempt
fn status_is_retryable(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Known transient network failure patterns
fn is_transient_network_error(e: &reqwest::Error) -> bool {
    if e.is_connect() || e.is_request() {
        return true;
    }

    let message = e.to_string().to_lowercase();
    message.contains("connection reset")
        || message.contains("connection refused")
        || message.contains("dns")
        || message.contains("error sending request")
}

/// Parse a response body: JSON when it parses, raw text otherwise
fn parse_body(text: String) -> Value {
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => json,
        Err(_) => Value::String(text),
    }
}

/// Perform an HTTP request with bounded exponential-backoff retry.
///
/// Attempt loop `0..=max_retries`: HTTP 2xx returns immediately; 429/5xx
/// and transient network errors retry after a jittered backoff delay;
/// other 4xx are terminal after a single attempt. A per-attempt deadline
/// of `config.timeout_ms` is enforced; exceeding it counts as TIMEOUT and
/// retries unless it was the final attempt.
pub async fn fetch_with_retry(
    url: &str,
    spec: &RequestSpec,
    config: &RetryConfig,
) -> FetchOutcome {
    let client = reqwest::Client::new();
    let started = Instant::now();

    let mut attempts = 0u32;
    let mut last_code = ErrorCode::UnknownError;
    let mut last_status: Option<u16> = None;
    let mut last_message: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("fetch {}: backing off {:?} before attempt {}", url, delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }

        attempts = attempt + 1;
        let is_final = attempt == config.max_retries;

        let mut builder = client.request(spec.method.clone(), url);
        for (key, value) in &spec.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }

        let attempt_result =
            tokio::time::timeout(config.timeout(), async {
                let response = builder.send().await?;
                let status = response.status().as_u16();
                let text = response.text().await?;
                Ok::<(u16, String), reqwest::Error>((status, text))
            })
            .await;

        match attempt_result {
            // Deadline exceeded - retry unless this was the last attempt
            Err(_) => {
                last_code = ErrorCode::Timeout;
                last_status = None;
                last_message = Some(format!(
                    "Request to '{}' exceeded {}ms deadline",
                    url, config.timeout_ms
                ));
                if is_final {
                    break;
                }
                warn!("fetch {}: attempt {} timed out, retrying", url, attempts);
            }

            // Network-level failure
            Ok(Err(e)) => {
                last_code = ErrorCode::NetworkError;
                last_status = None;
                last_message = Some(e.to_string());
                if !is_transient_network_error(&e) || is_final {
                    break;
                }
                warn!("fetch {}: attempt {} network error, retrying: {}", url, attempts, e);
            }

            Ok(Ok((status, text))) => {
                last_status = Some(status);

                if (200..300).contains(&status) {
                    return FetchOutcome {
                        ok: true,
                        status: Some(status),
                        data: Some(parse_body(text)),
                        error_code: None,
                        error_message: None,
                        attempts,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                }

                last_code = classify_status(status);
                last_message = Some(format!("HTTP {}: {}", status, truncate(&text, 200)));

                if !status_is_retryable(status) || is_final {
                    break;
                }
                warn!("fetch {}: attempt {} got HTTP {}, retrying", url, attempts, status);
            }
        }
    }

    FetchOutcome {
        ok: false,
        status: last_status,
        data: None,
        error_code: Some(last_code),
        error_message: last_message,
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
