//! Rate limit for repeated DOWN alerts.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::db::{DbError, StateStore};

/// Allows a DOWN alert only when at least `cooldown` has passed since the
/// endpoint's last alert. Recoveries bypass the gate.
#[derive(Debug, Clone, Copy)]
pub struct CooldownGate {
    cooldown: ChronoDuration,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: ChronoDuration::from_std(cooldown).unwrap_or(ChronoDuration::MAX),
        }
    }

    pub fn cooldown(&self) -> ChronoDuration {
        self.cooldown
    }

    /// Decide from a known last-alert time.
    pub fn permits(&self, last_alert_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_alert_at {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.cooldown,
        }
    }

    /// Decide for `endpoint_id` using the stored last-alert time.
    pub fn allowed(
        &self,
        store: &dyn StateStore,
        endpoint_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let last = store.read_last_alert_at(endpoint_id)?;
        Ok(self.permits(last, now))
    }
}
