//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::db::{
    CheckResult, CheckStatus, DbError, Endpoint, EndpointRegistry, StateSnapshot, StateStore,
    Subscriber, SubscriberDirectory,
};
use crate::notify::{Delivery, DeliveryError};
use crate::probe::Probe;

#[derive(Default)]
struct Inner {
    endpoints: Vec<Endpoint>,
    subscribers: Vec<Subscriber>,
    states: HashMap<i64, StateSnapshot>,
    logs: Vec<CheckResult>,
    failing: HashSet<i64>,
}

/// Registry, subscriber directory and state store in one, with per-endpoint
/// write failures on demand.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&self, id: i64, name: &str) {
        self.inner.lock().unwrap().endpoints.push(Endpoint {
            id,
            name: name.to_string(),
            url: format!("https://{}.example.com", name),
            created_at: Utc::now(),
        });
    }

    pub fn add_subscriber(&self, chat_id: &str, follows: Vec<i64>) {
        self.inner.lock().unwrap().subscribers.push(Subscriber {
            chat_id: chat_id.to_string(),
            username: None,
            follows,
        });
    }

    /// Seed a previous status as if an earlier cycle had stored it.
    pub fn set_status(&self, endpoint_id: i64, status: CheckStatus) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.states.entry(endpoint_id).or_insert_with(|| StateSnapshot {
            endpoint_id,
            ..Default::default()
        });
        state.last_status = Some(status);
    }

    /// Make every write for `endpoint_id` fail.
    pub fn fail_writes_for(&self, endpoint_id: i64) {
        self.inner.lock().unwrap().failing.insert(endpoint_id);
    }

    pub fn state(&self, endpoint_id: i64) -> Option<StateSnapshot> {
        self.inner.lock().unwrap().states.get(&endpoint_id).cloned()
    }

    pub fn logs_for(&self, endpoint_id: i64) -> Vec<CheckResult> {
        self.inner
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|l| l.endpoint_id == endpoint_id)
            .cloned()
            .collect()
    }

    fn check_writable(inner: &Inner, endpoint_id: i64) -> Result<(), DbError> {
        if inner.failing.contains(&endpoint_id) {
            return Err(DbError::Invalid(format!("injected failure for endpoint {}", endpoint_id)));
        }
        Ok(())
    }
}

impl EndpointRegistry for MemoryStore {
    fn list_endpoints(&self) -> Result<Vec<Endpoint>, DbError> {
        Ok(self.inner.lock().unwrap().endpoints.clone())
    }
}

impl SubscriberDirectory for MemoryStore {
    fn list_subscribers(&self) -> Result<Vec<Subscriber>, DbError> {
        Ok(self.inner.lock().unwrap().subscribers.clone())
    }
}

impl StateStore for MemoryStore {
    fn read_previous_status(&self, endpoint_id: i64) -> Result<Option<CheckStatus>, DbError> {
        Ok(self.state(endpoint_id).and_then(|s| s.last_status))
    }

    fn read_last_alert_at(&self, endpoint_id: i64) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.state(endpoint_id).and_then(|s| s.last_alert_at))
    }

    fn append_log(&self, result: &CheckResult) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, result.endpoint_id)?;
        inner.logs.push(result.clone());
        Ok(())
    }

    fn upsert_snapshot(&self, result: &CheckResult) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, result.endpoint_id)?;
        let state = inner.states.entry(result.endpoint_id).or_default();
        state.endpoint_id = result.endpoint_id;
        state.last_status = Some(result.status);
        state.last_status_code = result.status_code;
        state.last_latency = result.latency;
        state.last_checked_at = Some(result.checked_at);
        Ok(())
    }

    fn touch_alert(&self, endpoint_id: i64, now: DateTime<Utc>) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, endpoint_id)?;
        let state = inner.states.entry(endpoint_id).or_default();
        state.endpoint_id = endpoint_id;
        state.last_alert_at = Some(now);
        Ok(())
    }
}

/// Returns pre-scripted statuses per endpoint; UP once a script runs out.
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<i64, VecDeque<CheckStatus>>>,
    calls: Mutex<Vec<i64>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, endpoint_id: i64, statuses: &[CheckStatus]) {
        self.scripts
            .lock()
            .unwrap()
            .entry(endpoint_id)
            .or_default()
            .extend(statuses.iter().copied());
    }

    /// Endpoint ids probed so far, in completion order.
    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        self.calls.lock().unwrap().push(endpoint.id);
        let status = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&endpoint.id)
            .and_then(|s| s.pop_front())
            .unwrap_or(CheckStatus::Up);

        CheckResult {
            endpoint_id: endpoint.id,
            status,
            status_code: match status {
                CheckStatus::Up => Some(200),
                CheckStatus::Down => Some(503),
            },
            latency: Some(0.05),
            response: String::new(),
            checked_at: Utc::now(),
        }
    }
}

/// Records every delivery attempt; fails for the configured recipients.
#[derive(Default)]
pub struct RecordingDelivery {
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// `(recipient, text)` pairs, including failed attempts.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.messages().into_iter().map(|(r, _)| r).collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        if self.failing.contains(recipient) {
            return Err(DeliveryError::Other(format!("{} is unreachable", recipient)));
        }
        Ok(())
    }
}
