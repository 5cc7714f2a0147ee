//! Scheduler module for running probes and alerting on transitions.
//!
//! Each cycle reads the registry, probes every endpoint concurrently (bounded
//! by a semaphore), then evaluates the results one endpoint at a time. The
//! evaluation loop is the only writer of snapshots and alert timestamps and
//! cycles never overlap, so there is at most one in-flight write per
//! endpoint.

mod cooldown;
mod transition;

pub use cooldown::*;
pub use transition::*;

use crate::db::{
    CheckResult, CheckStatus, DbError, Endpoint, EndpointRegistry, StateStore, Subscriber,
    SubscriberDirectory,
};
use crate::notify::{format_alert, AlertKind, Notifier};
use crate::probe::Probe;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

/// Failures at the per-endpoint boundary. Logged, never propagated.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("storage error: {0}")]
    Store(#[from] DbError),
    #[error("probe task failed: {0}")]
    ProbeTask(String),
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between cycles.
    pub interval: Duration,
    /// Minimum gap between two DOWN alerts for the same endpoint.
    pub cooldown: Duration,
    /// Maximum number of probes in flight.
    pub probe_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(10),
            probe_concurrency: 16,
        }
    }
}

/// What happened to one endpoint during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointOutcome {
    pub endpoint_id: i64,
    pub status: CheckStatus,
    pub transition: Transition,
    pub alert: Option<AlertKind>,
    /// Recipients attempted for the alert, zero when none was sent.
    pub recipients: usize,
}

/// Summary of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<EndpointOutcome>,
    pub failed: usize,
    /// Shutdown was requested before every endpoint was evaluated.
    pub cancelled: bool,
}

/// The main scheduler that drives the monitoring cycles.
pub struct Scheduler {
    registry: Arc<dyn EndpointRegistry>,
    subscribers: Arc<dyn SubscriberDirectory>,
    store: Arc<dyn StateStore>,
    prober: Arc<dyn Probe>,
    notifier: Notifier,
    gate: CooldownGate,
    interval: Duration,
    probe_limit: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        subscribers: Arc<dyn SubscriberDirectory>,
        store: Arc<dyn StateStore>,
        prober: Arc<dyn Probe>,
        notifier: Notifier,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            subscribers,
            store,
            prober,
            notifier,
            gate: CooldownGate::new(config.cooldown),
            interval: config.interval,
            probe_limit: Arc::new(Semaphore::new(config.probe_concurrency.max(1))),
        }
    }

    /// Run cycles until `shutdown` turns true (or its sender is dropped).
    ///
    /// Shutdown interrupts the inter-cycle sleep and is checked between
    /// endpoints; in-flight probes run to their own timeout.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Scheduler running every {:?} (cooldown {:?}, alerts via {})",
            self.interval,
            self.gate.cooldown(),
            self.notifier.channel_name()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle(&shutdown).await;
            tracing::debug!(
                "Cycle finished: {} evaluated, {} failed, {} alerts",
                report.outcomes.len(),
                report.failed,
                report.outcomes.iter().filter(|o| o.alert.is_some()).count()
            );
            if report.cancelled {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Probe and evaluate every registered endpoint once.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let mut report = CycleReport::default();

        let endpoints = match self.registry.list_endpoints() {
            Ok(endpoints) => dedupe_by_id(endpoints),
            Err(e) => {
                tracing::error!("Scheduler: Failed to list endpoints: {}", e);
                return report;
            }
        };

        if endpoints.is_empty() {
            tracing::debug!("No endpoints registered, skipping probes");
            return report;
        }

        let results = self.probe_all(&endpoints, shutdown).await;

        // Loaded on the first alert of the cycle
        let mut subscribers: Option<Vec<Subscriber>> = None;

        for (endpoint, result) in endpoints.iter().zip(results) {
            if *shutdown.borrow() {
                tracing::info!("Scheduler stopping mid-cycle");
                report.cancelled = true;
                break;
            }

            let outcome = match result {
                Ok(Some(result)) => self.evaluate(endpoint, result, &mut subscribers).await,
                Ok(None) => {
                    // Skipped by a shutdown that began while probes were queued
                    report.cancelled = true;
                    break;
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Failed to process endpoint {}: {}", endpoint.name, e);
                }
            }
        }

        report
    }

    /// Probe all endpoints concurrently, preserving input order.
    ///
    /// A probe still waiting for a permit when shutdown is requested never
    /// starts and yields `None`.
    async fn probe_all(
        &self,
        endpoints: &[Endpoint],
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<Result<Option<CheckResult>, MonitorError>> {
        let handles: Vec<_> = endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                let prober = self.prober.clone();
                let limit = self.probe_limit.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|stop| *stop) => return None,
                        permit = limit.acquire_owned() => permit,
                    };
                    // The semaphore is never closed
                    let _permit = permit.ok();
                    if *shutdown.borrow() {
                        return None;
                    }
                    Some(prober.probe(&endpoint).await)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.map_err(|e| MonitorError::ProbeTask(e.to_string())));
        }
        results
    }

    /// Record a probe result and alert if warranted.
    async fn evaluate(
        &self,
        endpoint: &Endpoint,
        result: CheckResult,
        subscribers: &mut Option<Vec<Subscriber>>,
    ) -> Result<EndpointOutcome, MonitorError> {
        let store = self.store.as_ref();
        let now = result.checked_at;

        store.append_log(&result)?;

        let detection = detect(store, endpoint.id, result.status)?;
        let alert = self.decide_alert(endpoint.id, &detection, result.status, now)?;

        let mut recipients = 0;
        if let Some(kind) = alert {
            if subscribers.is_none() {
                *subscribers = Some(self.subscribers.list_subscribers()?);
            }
            let audience = subscribers.as_deref().unwrap_or(&[]);

            let message = format_alert(kind, endpoint, &result);
            recipients = self.notifier.notify(endpoint.id, &message, audience).await;
            store.touch_alert(endpoint.id, now)?;

            tracing::info!(
                "Alert {:?} for {} sent to {} recipient(s)",
                kind,
                endpoint.name,
                recipients
            );
        }

        store.upsert_snapshot(&result)?;

        tracing::debug!(
            "{} -> {} ({:?}, {:?}s)",
            endpoint.url,
            result.status,
            result.status_code,
            result.latency
        );

        Ok(EndpointOutcome {
            endpoint_id: endpoint.id,
            status: result.status,
            transition: detection.transition,
            alert,
            recipients,
        })
    }

    /// Recoveries always alert. DOWN alerts (new or repeated) pass the
    /// cooldown gate, except on an endpoint's very first probe.
    fn decide_alert(
        &self,
        endpoint_id: i64,
        detection: &Detection,
        current: CheckStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertKind>, DbError> {
        if detection.transition == Transition::Recovered {
            return Ok(Some(AlertKind::Recovered));
        }

        if current == CheckStatus::Down
            && !detection.first_observation
            && self.gate.allowed(self.store.as_ref(), endpoint_id, now)?
        {
            return Ok(Some(AlertKind::Down));
        }

        Ok(None)
    }
}

/// Keep the first occurrence of each endpoint id.
fn dedupe_by_id(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = HashSet::new();
    endpoints.into_iter().filter(|e| seen.insert(e.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, RecordingDelivery, ScriptedProbe};
    use crate::db::CheckStatus::{Down, Up};

    struct Harness {
        store: Arc<MemoryStore>,
        probe: Arc<ScriptedProbe>,
        delivery: Arc<RecordingDelivery>,
        scheduler: Scheduler,
        shutdown_tx: watch::Sender<bool>,
        shutdown: watch::Receiver<bool>,
    }

    fn harness(cooldown: Duration) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(ScriptedProbe::new());
        let delivery = Arc::new(RecordingDelivery::new());
        let notifier = Notifier::new(delivery.clone(), 4);
        let scheduler = Scheduler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            probe.clone(),
            notifier,
            SchedulerConfig {
                interval: Duration::from_secs(3600),
                cooldown,
                probe_concurrency: 4,
            },
        );
        let (tx, rx) = watch::channel(false);
        Harness {
            store,
            probe,
            delivery,
            scheduler,
            shutdown_tx: tx,
            shutdown: rx,
        }
    }

    #[tokio::test]
    async fn test_first_observation_down_does_not_alert() {
        let h = harness(Duration::ZERO);
        h.store.add_endpoint(1, "api");
        h.store.add_subscriber("ops", vec![]);
        h.probe.script(1, &[Down, Down]);

        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert_eq!(report.outcomes[0].alert, None);
        assert!(h.delivery.messages().is_empty());
        assert_eq!(h.store.state(1).unwrap().last_status, Some(Down));

        // Still down on the next cycle: now it is a repeat and the gate is open
        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert_eq!(report.outcomes[0].alert, Some(AlertKind::Down));
        assert_eq!(h.delivery.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_down_then_recovery_with_long_cooldown() {
        let h = harness(Duration::from_secs(3600));
        h.store.add_endpoint(1, "api");
        h.store.add_subscriber("ops", vec![]);
        h.probe.script(1, &[Up, Down, Down, Down, Up]);

        let mut transitions = Vec::new();
        let mut alerts = Vec::new();
        for _ in 0..5 {
            let report = h.scheduler.run_cycle(&h.shutdown).await;
            let outcome = &report.outcomes[0];
            if outcome.transition != Transition::None {
                transitions.push(outcome.transition);
            }
            if let Some(kind) = outcome.alert {
                alerts.push(kind);
            }
        }

        assert_eq!(transitions, vec![Transition::BecameDown, Transition::Recovered]);
        // Repeated DOWNs are held back by the cooldown, the recovery is not
        assert_eq!(alerts, vec![AlertKind::Down, AlertKind::Recovered]);

        let messages = h.delivery.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].1.starts_with("🔴 API DOWN"));
        assert!(messages[1].1.starts_with("🟢 API RECOVERED"));
        assert!(h.store.state(1).unwrap().last_alert_at.is_some());
    }

    #[tokio::test]
    async fn test_recovery_ignores_recent_down_alert() {
        let h = harness(Duration::from_secs(3600));
        h.store.add_endpoint(1, "api");
        h.store.add_subscriber("ops", vec![]);
        h.store.set_status(1, Down);
        h.store.touch_alert(1, chrono::Utc::now()).unwrap();
        h.probe.script(1, &[Up]);

        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert_eq!(report.outcomes[0].alert, Some(AlertKind::Recovered));
        assert_eq!(report.outcomes[0].recipients, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_isolated_to_one_endpoint() {
        let h = harness(Duration::ZERO);
        for id in 1..=3 {
            h.store.add_endpoint(id, &format!("api-{}", id));
            h.store.set_status(id, Up);
            h.probe.script(id, &[Down]);
        }
        h.store.add_subscriber("ops", vec![]);
        h.store.fail_writes_for(2);

        let report = h.scheduler.run_cycle(&h.shutdown).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.outcomes.len(), 2);
        let mut probed = h.probe.calls();
        probed.sort();
        assert_eq!(probed, vec![1, 2, 3]);
        assert_eq!(h.store.logs_for(1).len(), 1);
        assert_eq!(h.store.logs_for(3).len(), 1);
        assert_eq!(h.store.state(1).unwrap().last_status, Some(Down));
        assert_eq!(h.store.state(3).unwrap().last_status, Some(Down));
        // Endpoint 2 keeps its stale state until a later cycle succeeds
        assert_eq!(h.store.state(2).unwrap().last_status, Some(Up));
        assert_eq!(h.delivery.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_alert_goes_only_to_interested_subscribers() {
        let h = harness(Duration::ZERO);
        h.store.add_endpoint(1, "api");
        h.store.set_status(1, Up);
        h.store.add_subscriber("everything", vec![]);
        h.store.add_subscriber("follows-1", vec![1]);
        h.store.add_subscriber("follows-2", vec![2]);
        h.probe.script(1, &[Down]);

        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert_eq!(report.outcomes[0].recipients, 2);

        let mut recipients = h.delivery.recipients();
        recipients.sort();
        assert_eq!(recipients, vec!["everything", "follows-1"]);
    }

    #[tokio::test]
    async fn test_empty_registry_skips_probing() {
        let h = harness(Duration::ZERO);
        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.failed, 0);
        assert!(h.probe.calls().is_empty());
    }

    #[tokio::test]
    async fn test_registry_is_read_every_cycle() {
        let h = harness(Duration::ZERO);
        h.store.add_endpoint(1, "first");
        h.scheduler.run_cycle(&h.shutdown).await;
        assert_eq!(h.probe.calls(), vec![1]);

        h.store.add_endpoint(2, "second");
        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(h.store.logs_for(2).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_evaluation() {
        let h = harness(Duration::ZERO);
        h.store.add_endpoint(1, "api");
        h.shutdown_tx.send(true).unwrap();

        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(h.store.logs_for(1).is_empty());
    }

    /// Requests shutdown from inside the first probe, like Ctrl-C mid-cycle.
    struct StopDuringProbe {
        shutdown_tx: watch::Sender<bool>,
        started: std::sync::Mutex<Vec<i64>>,
    }

    #[async_trait::async_trait]
    impl Probe for StopDuringProbe {
        async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
            self.started.lock().unwrap().push(endpoint.id);
            let _ = self.shutdown_tx.send(true);
            tokio::time::sleep(Duration::from_millis(50)).await;
            CheckResult {
                endpoint_id: endpoint.id,
                status: Up,
                status_code: Some(200),
                latency: Some(0.05),
                response: String::new(),
                checked_at: chrono::Utc::now(),
            }
        }
    }

    #[tokio::test]
    async fn test_no_probe_starts_after_shutdown_signal() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=5 {
            store.add_endpoint(id, &format!("api-{}", id));
        }
        let (tx, rx) = watch::channel(false);
        let probe = Arc::new(StopDuringProbe {
            shutdown_tx: tx,
            started: std::sync::Mutex::new(Vec::new()),
        });
        let scheduler = Scheduler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            probe.clone(),
            Notifier::new(Arc::new(RecordingDelivery::new()), 1),
            SchedulerConfig {
                interval: Duration::from_secs(3600),
                cooldown: Duration::ZERO,
                probe_concurrency: 1,
            },
        );

        let started = std::time::Instant::now();
        let report = scheduler.run_cycle(&rx).await;

        // Only the probe that was already running when shutdown arrived
        assert_eq!(probe.started.lock().unwrap().len(), 1);
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        for id in 1..=5 {
            assert!(store.logs_for(id).is_empty());
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_cycle_starts_no_probes() {
        let h = harness(Duration::ZERO);
        h.store.add_endpoint(1, "api");
        h.store.add_endpoint(2, "other");
        h.shutdown_tx.send(true).unwrap();

        let report = h.scheduler.run_cycle(&h.shutdown).await;
        assert!(report.cancelled);
        assert!(h.probe.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_during_sleep() {
        let h = harness(Duration::ZERO);
        h.store.add_endpoint(1, "api");
        let Harness {
            scheduler,
            shutdown_tx: tx,
            shutdown,
            probe,
            ..
        } = h;

        let scheduler = Arc::new(scheduler);
        let task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        // Wait for the first cycle to probe, then stop while it sleeps
        for _ in 0..100 {
            if !probe.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("scheduler should stop promptly")
            .unwrap();
        assert_eq!(probe.calls(), vec![1]);
    }

    #[test]
    fn test_dedupe_by_id() {
        let now = chrono::Utc::now();
        let ep = |id, name: &str| Endpoint {
            id,
            name: name.to_string(),
            url: format!("https://{}.example.com", name),
            created_at: now,
        };
        let deduped = dedupe_by_id(vec![ep(1, "a"), ep(2, "b"), ep(1, "c")]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].name, "a");
    }
}
