//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classified health of an endpoint as seen by one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "UP",
            CheckStatus::Down => "DOWN",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(CheckStatus::Up),
            "DOWN" => Ok(CheckStatus::Down),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// A monitored HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a single probe. Appended to the check log, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub endpoint_id: i64,
    pub status: CheckStatus,
    /// Present only when the HTTP exchange completed.
    pub status_code: Option<u16>,
    /// Elapsed seconds from just before the request to its outcome.
    pub latency: Option<f64>,
    /// Response body or failure description, truncated to the excerpt cap.
    pub response: String,
    pub checked_at: DateTime<Utc>,
}

/// A stored check log row.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub endpoint_id: i64,
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    pub latency: Option<f64>,
    pub response: String,
    pub checked_at: DateTime<Utc>,
}

/// Latest known state of one endpoint, overwritten in place every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub endpoint_id: i64,
    pub last_status: Option<CheckStatus>,
    pub last_status_code: Option<u16>,
    pub last_latency: Option<f64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// An endpoint joined with its snapshot, as listed by the dashboard API.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointWithState {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub last_status: Option<CheckStatus>,
    pub last_status_code: Option<u16>,
    pub last_latency: Option<f64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// An alert recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub chat_id: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Followed endpoint ids. Empty means every endpoint.
    #[serde(default)]
    pub follows: Vec<i64>,
}

impl Subscriber {
    /// Whether this subscriber should receive alerts for `endpoint_id`.
    pub fn is_interested_in(&self, endpoint_id: i64) -> bool {
        self.follows.is_empty() || self.follows.contains(&endpoint_id)
    }
}

/// Aggregate counts for the overview page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverviewStats {
    pub total: i64,
    pub up: i64,
    pub down: i64,
}
