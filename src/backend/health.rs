use super::BackendId;
use super::traits::Backend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A backend is considered unhealthy once this many probes or executions
/// have failed in a row. Any success resets the counter.
pub const UNHEALTHY_FAILURE_THRESHOLD: u32 = 3;

/// Default background probe interval.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub backend: BackendId,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
}

impl HealthRecord {
    pub fn unknown(backend: BackendId) -> Self {
        Self {
            backend,
            healthy: true,
            last_probe_at: None,
            last_latency_ms: None,
            consecutive_failures: 0,
        }
    }

    pub fn up(backend: BackendId, latency_ms: u64) -> Self {
        Self {
            backend,
            healthy: true,
            last_probe_at: Some(Utc::now()),
            last_latency_ms: Some(latency_ms),
            consecutive_failures: 0,
        }
    }

    pub fn down(backend: BackendId) -> Self {
        Self {
            backend,
            healthy: false,
            last_probe_at: Some(Utc::now()),
            last_latency_ms: None,
            consecutive_failures: 1,
        }
    }
}

/// Process-wide availability tracker, one lock per backend. Clients report
/// into it on every execution and probe; the router consults it when
/// building a fallback chain. `snapshot` returns copies only.
pub struct HealthRegistry {
    records: HashMap<BackendId, Mutex<HealthRecord>>,
}

impl HealthRegistry {
    pub fn new(backends: &[BackendId]) -> Self {
        let records = backends
            .iter()
            .map(|&id| (id, Mutex::new(HealthRecord::unknown(id))))
            .collect();
        Self { records }
    }

    pub fn get(&self, backend: BackendId) -> Option<HealthRecord> {
        self.records
            .get(&backend)
            .map(|lock| lock.lock().expect("health lock poisoned").clone())
    }

    /// A backend absent from the registry was never configured and is
    /// treated as unavailable.
    pub fn is_healthy(&self, backend: BackendId) -> bool {
        self.get(backend).is_some_and(|record| record.healthy)
    }

    pub fn mark_success(&self, backend: BackendId, latency_ms: u64) {
        if let Some(lock) = self.records.get(&backend) {
            let mut record = lock.lock().expect("health lock poisoned");
            if !record.healthy {
                tracing::info!(backend = %backend, "backend recovered");
            }
            record.healthy = true;
            record.consecutive_failures = 0;
            record.last_probe_at = Some(Utc::now());
            record.last_latency_ms = Some(latency_ms);
        }
    }

    pub fn mark_failure(&self, backend: BackendId) {
        if let Some(lock) = self.records.get(&backend) {
            let mut record = lock.lock().expect("health lock poisoned");
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_probe_at = Some(Utc::now());
            if record.consecutive_failures >= UNHEALTHY_FAILURE_THRESHOLD && record.healthy {
                record.healthy = false;
                tracing::warn!(
                    backend = %backend,
                    failures = record.consecutive_failures,
                    "backend marked unhealthy"
                );
            }
        }
    }

    pub fn snapshot(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self
            .records
            .values()
            .map(|lock| lock.lock().expect("health lock poisoned").clone())
            .collect();
        records.sort_by_key(|r| r.backend.to_string());
        records
    }

    /// Fold one probe outcome into the registry.
    pub fn record_probe(&self, outcome: &HealthRecord) {
        if outcome.healthy {
            self.mark_success(outcome.backend, outcome.last_latency_ms.unwrap_or(0));
        } else {
            self.mark_failure(outcome.backend);
        }
    }
}

/// Background probe loop. Probes every configured backend each tick until
/// the token is cancelled.
pub fn spawn_probe_loop(
    registry: Arc<HealthRegistry>,
    backends: Vec<Arc<dyn Backend>>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let probes = backends.iter().map(|backend| backend.probe());
            for outcome in futures_util::future::join_all(probes).await {
                registry.record_probe(&outcome);
            }
        }
        tracing::debug!("health probe loop stopped");
    })
}
