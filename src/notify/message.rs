//! Alert message text.

use serde::Serialize;

use crate::db::{CheckResult, Endpoint};

/// Kind of alert sent to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertKind {
    Down,
    Recovered,
}

impl AlertKind {
    pub fn header(&self) -> &'static str {
        match self {
            AlertKind::Down => "🔴 API DOWN",
            AlertKind::Recovered => "🟢 API RECOVERED",
        }
    }
}

/// Render the alert for `endpoint` from the probe that triggered it.
pub fn format_alert(kind: AlertKind, endpoint: &Endpoint, result: &CheckResult) -> String {
    let status_code = result
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let latency = result
        .latency
        .map(|l| format!("{:.3}s", l))
        .unwrap_or_else(|| "n/a".to_string());

    format!(
        "{}\nName: {}\nURL: {}\nStatus code: {}\nLatency: {}",
        kind.header(),
        endpoint.name,
        endpoint.url,
        status_code,
        latency
    )
}
