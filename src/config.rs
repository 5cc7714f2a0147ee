//! Configuration module for apiwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::ProbeConfig;
use crate::scheduler::SchedulerConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8001)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "apiwatch.db")
    pub db_path: String,
    /// Seconds between monitoring cycles (default: 10)
    pub poll_interval_secs: u64,
    /// Minimum seconds between repeated DOWN alerts (default: 10)
    pub cooldown_secs: u64,
    /// Probe timeout in seconds (default: 10)
    pub probe_timeout_secs: u64,
    /// Maximum stored response excerpt in bytes (default: 200)
    pub excerpt_cap: usize,
    /// Maximum concurrent probes per cycle (default: 16)
    pub probe_concurrency: usize,
    /// Maximum concurrent deliveries per alert (default: 8)
    pub delivery_concurrency: usize,
    /// Telegram bot token; alerts go to the log when unset
    pub telegram_bot_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8001,
            db_path: "apiwatch.db".to_string(),
            poll_interval_secs: 10,
            cooldown_secs: 10,
            probe_timeout_secs: 10,
            excerpt_cap: 200,
            probe_concurrency: 16,
            delivery_concurrency: 8,
            telegram_bot_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `APIWATCH_HTTP_PORT`: API port (default: 8001)
    /// - `APIWATCH_DB_PATH`: Database file path (default: "apiwatch.db")
    /// - `APIWATCH_POLL_INTERVAL_SECS`: cycle interval (default: 10)
    /// - `APIWATCH_COOLDOWN_SECS`: DOWN re-alert cooldown (default: 10)
    /// - `APIWATCH_PROBE_TIMEOUT_SECS`: probe timeout (default: 10)
    /// - `APIWATCH_EXCERPT_CAP`: response excerpt bytes (default: 200)
    /// - `APIWATCH_PROBE_CONCURRENCY`: probes in flight (default: 16)
    /// - `APIWATCH_DELIVERY_CONCURRENCY`: deliveries in flight (default: 8)
    /// - `TELEGRAM_BOT_TOKEN`: enables Telegram delivery
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        positive(&lookup, "APIWATCH_HTTP_PORT", &mut cfg.http_port);
        positive(&lookup, "APIWATCH_POLL_INTERVAL_SECS", &mut cfg.poll_interval_secs);
        positive(&lookup, "APIWATCH_COOLDOWN_SECS", &mut cfg.cooldown_secs);
        positive(&lookup, "APIWATCH_PROBE_TIMEOUT_SECS", &mut cfg.probe_timeout_secs);
        positive(&lookup, "APIWATCH_EXCERPT_CAP", &mut cfg.excerpt_cap);
        positive(&lookup, "APIWATCH_PROBE_CONCURRENCY", &mut cfg.probe_concurrency);
        positive(&lookup, "APIWATCH_DELIVERY_CONCURRENCY", &mut cfg.delivery_concurrency);

        if let Some(db_path) = lookup("APIWATCH_DB_PATH").filter(|p| !p.trim().is_empty()) {
            cfg.db_path = db_path;
        }

        cfg.telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        cfg
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(self.probe_timeout_secs),
            excerpt_cap: self.excerpt_cap,
            ..ProbeConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
            probe_concurrency: self.probe_concurrency,
        }
    }
}

/// Overwrite `target` with a parsed, non-zero value; keep the default otherwise.
fn positive<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => *target = value,
        _ => tracing::warn!("Ignoring invalid {}={:?}, keeping default", key, raw),
    }
}
