//! HTTP probe implementation.

use chrono::Utc;
use std::error::Error as StdError;
use std::time::Instant;

use super::{ProbeConfig, ProbeError};
use crate::db::{CheckResult, CheckStatus};

/// Response excerpt recorded when a probe times out.
pub const TIMEOUT_EXCERPT: &str = "Timeout";

/// Run an HTTP probe against `url` and classify the outcome.
///
/// UP iff the exchange completed with a status code below 400. Latency is
/// measured for failed probes too.
pub async fn run_http_probe(
    client: &reqwest::Client,
    endpoint_id: i64,
    url: &str,
    config: &ProbeConfig,
) -> CheckResult {
    let checked_at = Utc::now();
    let start = Instant::now();

    let outcome = fetch(client, url, config).await;
    let latency = Some(round_latency(start.elapsed().as_secs_f64()));

    match outcome {
        Ok((code, body)) => CheckResult {
            endpoint_id,
            status: classify_status_code(code),
            status_code: Some(code),
            latency,
            response: truncate_excerpt(&body, config.excerpt_cap),
            checked_at,
        },
        Err(ProbeError::Timeout(_)) => CheckResult {
            endpoint_id,
            status: CheckStatus::Down,
            status_code: None,
            latency,
            response: TIMEOUT_EXCERPT.to_string(),
            checked_at,
        },
        Err(e) => CheckResult {
            endpoint_id,
            status: CheckStatus::Down,
            status_code: None,
            latency,
            response: truncate_excerpt(&e.to_string(), config.excerpt_cap),
            checked_at,
        },
    }
}

async fn fetch(client: &reqwest::Client, url: &str, config: &ProbeConfig) -> Result<(u16, String), ProbeError> {
    let response = client
        .get(url)
        .timeout(config.timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(config.timeout)
            } else {
                ProbeError::Network(describe_error(&e))
            }
        })?;

    let code = response.status().as_u16();

    // The status line arrived, so a body failure does not change the classification
    let body = match read_excerpt(response, config.excerpt_cap).await {
        Ok(body) => body,
        Err(e) if e.is_timeout() => TIMEOUT_EXCERPT.to_string(),
        Err(e) => describe_error(&e),
    };

    Ok((code, body))
}

/// Read at most about `cap` bytes of the body, then drop the connection.
async fn read_excerpt(mut response: reqwest::Response, cap: usize) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::with_capacity(cap.min(64 * 1024));
    while buf.len() < cap {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    buf.truncate(cap);

    Ok(truncate_excerpt(&String::from_utf8_lossy(&buf), cap))
}

/// Map an HTTP status code to UP/DOWN.
pub fn classify_status_code(code: u16) -> CheckStatus {
    if code < 400 {
        CheckStatus::Up
    } else {
        CheckStatus::Down
    }
}

/// Truncate to at most `cap` bytes without splitting a UTF-8 character.
pub fn truncate_excerpt(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Join an error with its sources, e.g. "error sending request: dns error: ...".
fn describe_error(err: &reqwest::Error) -> String {
    let mut description = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !description.contains(&text) {
            description.push_str(": ");
            description.push_str(&text);
        }
        source = cause.source();
    }
    description
}

fn round_latency(secs: f64) -> f64 {
    (secs * 1_000_000.0).round() / 1_000_000.0
}
