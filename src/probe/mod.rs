//! Probe module for endpoint health checks.
//!
//! A probe is one bounded HTTP GET. Transport failures never escape as
//! errors: they are classified into a DOWN [`CheckResult`].

mod http;

pub use http::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::db::{CheckResult, Endpoint};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    /// Maximum response excerpt length in bytes.
    pub excerpt_cap: usize,
    /// Upper bound of the random delay before each probe.
    pub max_jitter: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            excerpt_cap: 200,
            max_jitter: Duration::from_millis(100),
        }
    }
}

/// Something that can check one endpoint.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult;
}

/// Probes endpoints with a shared HTTP client.
pub struct HttpProber {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        if config.timeout.is_zero() {
            return Err(ProbeError::Config("probe timeout must be positive".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("apiwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        // Spread a cycle's requests out a little
        let max_jitter = self.config.max_jitter.as_millis() as u64;
        if max_jitter > 0 {
            let jitter = rand::random::<u64>() % max_jitter;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        run_http_probe(&self.client, endpoint.id, &endpoint.url, &self.config).await
    }
}
