//! Collaborator contracts consumed by the monitoring engine.
//!
//! [`Store`](super::Store) implements all three against SQLite. Each call is
//! atomic per endpoint id; the engine never spans a transaction across
//! endpoints.

use chrono::{DateTime, Utc};

use super::models::{CheckResult, CheckStatus, Endpoint, Subscriber};
use super::store::DbError;

/// Source of the endpoints to probe, read fresh every cycle.
pub trait EndpointRegistry: Send + Sync {
    fn list_endpoints(&self) -> Result<Vec<Endpoint>, DbError>;
}

/// Source of alert recipients.
pub trait SubscriberDirectory: Send + Sync {
    fn list_subscribers(&self) -> Result<Vec<Subscriber>, DbError>;
}

/// Per-endpoint check history and current-state snapshot.
pub trait StateStore: Send + Sync {
    /// Status recorded by the previous probe; `None` before the first one.
    fn read_previous_status(&self, endpoint_id: i64) -> Result<Option<CheckStatus>, DbError>;

    fn read_last_alert_at(&self, endpoint_id: i64) -> Result<Option<DateTime<Utc>>, DbError>;

    /// Append to the check log. Log rows are never overwritten.
    fn append_log(&self, result: &CheckResult) -> Result<(), DbError>;

    /// Overwrite the status fields of the snapshot, last write wins.
    fn upsert_snapshot(&self, result: &CheckResult) -> Result<(), DbError>;

    /// Set `last_alert_at`, leaving the status fields alone.
    fn touch_alert(&self, endpoint_id: i64, now: DateTime<Utc>) -> Result<(), DbError>;
}
