//! Multi-session orchestration.
//!
//! Owns every live session behind one registry lock, admits requests under
//! per-session and global limits, runs periodic maintenance, and hands
//! sessions between instances through the handoff store. Lock order is
//! registry lock, then session lock; neither is ever held across I/O.

use super::balance::{BalanceStrategy, InstanceStats, LoadBalancer};
use super::handoff::{HANDOFF_TTL, HandoffStore, handoff_key};
use super::monitor::{GlobalResourceMonitor, ResourceSnapshot};
use crate::delegation::PressureGauge;
use crate::error::{Result, SessionError};
use crate::session::{PoolStats, Session, SessionConfig, SessionPool};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub min_pool: usize,
    pub max_pool: usize,
    /// Global cap on concurrently running requests across all sessions.
    pub max_workers: usize,
    pub instances: Vec<String>,
    pub strategy: BalanceStrategy,
    pub max_memory_percent: f64,
    pub max_cpu_percent: f64,
    pub idle_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_pool: 5,
            max_pool: 50,
            max_workers: 20,
            instances: vec!["local".to_string()],
            strategy: BalanceStrategy::default(),
            max_memory_percent: super::monitor::DEFAULT_MAX_MEMORY_PERCENT,
            max_cpu_percent: super::monitor::DEFAULT_MAX_CPU_PERCENT,
            idle_timeout_secs: 2 * 60 * 60,
            drain_timeout_secs: 30,
            maintenance_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrchestratorStatus {
    pub active_sessions: usize,
    pub migrating_sessions: usize,
    pub pool: PoolStats,
    pub resources: ResourceSnapshot,
    pub instances: HashMap<String, InstanceStats>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub sessions_reaped: usize,
    pub entries_reaped: usize,
    pub idle_discarded: usize,
}

pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    pool: SessionPool,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    monitor: GlobalResourceMonitor,
    balancer: LoadBalancer,
    handoff: Arc<dyn HandoffStore>,
    pressure: Arc<PressureGauge>,
    workers: Arc<tokio::sync::Semaphore>,
}

impl SessionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        handoff: Arc<dyn HandoffStore>,
        pressure: Arc<PressureGauge>,
    ) -> Self {
        let pool = SessionPool::new(config.min_pool, config.max_pool);
        let monitor =
            GlobalResourceMonitor::new(config.max_memory_percent, config.max_cpu_percent);
        let balancer = LoadBalancer::new(config.instances.clone(), config.strategy);
        let workers = Arc::new(tokio::sync::Semaphore::new(config.max_workers.max(1)));
        Self {
            config,
            pool,
            sessions: Mutex::new(HashMap::new()),
            monitor,
            balancer,
            handoff,
            pressure,
            workers,
        }
    }

    pub fn monitor(&self) -> &GlobalResourceMonitor {
        &self.monitor
    }

    // ── Admission ───────────────────────────────────────────────────────

    /// Admit a new session, drawing from the pool. Fails when the host is
    /// already past its memory or CPU thresholds.
    pub fn create_session(
        &self,
        user_id: &str,
        config: Option<SessionConfig>,
    ) -> Result<String> {
        if !self.monitor.can_admit() {
            return Err(SessionError::ResourceExhausted(
                "global memory or CPU threshold exceeded".into(),
            )
            .into());
        }

        let mut config = config.unwrap_or_else(|| SessionConfig::new(user_id));
        config.user_id = user_id.to_string();

        let target = self.balancer.select_instance(&config);
        tracing::debug!(
            session = config.session_id.as_str(),
            target = target.as_str(),
            "instance advisory for new session"
        );

        let session_id = config.session_id.clone();
        let session = self.pool.acquire(config);
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));

        tracing::info!(session = session_id.as_str(), user = user_id, "session created");
        Ok(session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Run `op` inside the session's admission envelope. The session lock is
    /// held only to book-keep; the operation itself runs unlocked, and the
    /// request id is removed no matter how the operation ends.
    pub async fn execute_request<T, F, Fut>(&self, session_id: &str, op: F) -> Result<T>
    where
        F: FnOnce(Arc<Mutex<Session>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let request_id = format!("req_{}", Uuid::new_v4());
        {
            let mut session = handle.lock().expect("session lock poisoned");
            if session.is_migrating {
                return Err(SessionError::Migrating(session_id.to_string()).into());
            }
            if !session.can_accept_request() {
                return Err(SessionError::Busy(session_id.to_string()).into());
            }
            session.begin_request(&request_id);
        }

        // Worker cap is global; waiting for a permit counts as queueing.
        self.pressure.enqueue();
        let permit = self
            .workers
            .acquire()
            .await
            .expect("worker semaphore closed");
        let started = Instant::now();
        let outcome = op(Arc::clone(&handle)).await;
        drop(permit);
        self.pressure.dequeue();

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        {
            let mut session = handle.lock().expect("session lock poisoned");
            session.end_request(&request_id);
            session.record_completion(duration_ms, outcome.is_err());
        }

        outcome
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Close a session, waiting up to the drain timeout for in-flight
    /// requests, then recycle it through the pool.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let handle = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        self.drain(&handle).await;

        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .remove(session_id);

        let session = Arc::try_unwrap(handle).map_or_else(
            |shared| {
                // Another holder still exists; snapshot-and-rebuild keeps the
                // recycled instance detached from it.
                let session = shared.lock().expect("session lock poisoned");
                Session::restore(session.snapshot())
            },
            |exclusive| exclusive.into_inner().expect("session lock poisoned"),
        );

        if session.config.auto_recycle {
            self.pool.release(session);
        }
        tracing::info!(session = session_id, "session closed");
        Ok(())
    }

    async fn drain(&self, handle: &Arc<Mutex<Session>>) {
        let deadline = Instant::now() + Duration::from_secs(self.config.drain_timeout_secs);
        loop {
            let active = handle
                .lock()
                .expect("session lock poisoned")
                .active_request_count();
            if active == 0 {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(active, "drain timeout elapsed; proceeding anyway");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // ── Migration ───────────────────────────────────────────────────────

    /// Best-effort migration: block new admissions, drain within the
    /// timeout, then publish the snapshot for the target to claim. In-flight
    /// results past the timeout are lost by design.
    pub async fn migrate_session(&self, session_id: &str, target: &str) -> Result<()> {
        let handle = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        {
            let mut session = handle.lock().expect("session lock poisoned");
            if session.is_migrating {
                return Err(SessionError::Migrating(session_id.to_string()).into());
            }
            session.is_migrating = true;
            session.migration_target = Some(target.to_string());
        }

        self.drain(&handle).await;

        let snapshot = handle.lock().expect("session lock poisoned").snapshot();
        let key = handoff_key(session_id, target);
        self.handoff.put(&key, snapshot, HANDOFF_TTL).await;

        tracing::info!(
            session = session_id,
            target = target,
            "session snapshot published for migration"
        );
        Ok(())
    }

    /// Target side: claim a migrated session from the handoff store,
    /// reconstruct it, and delete the entry.
    pub async fn restore_session(&self, session_id: &str, source: &str) -> Result<String> {
        let key = handoff_key(session_id, source);
        let deadline = Instant::now() + Duration::from_secs(5);

        let snapshot = loop {
            if let Some(snapshot) = self.handoff.get(&key).await {
                break snapshot;
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Migration {
                    session_id: session_id.to_string(),
                    message: "handoff entry not found before timeout".into(),
                }
                .into());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        self.handoff.remove(&key).await;

        let session = Session::restore(snapshot);
        let restored_id = session.id().to_string();
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .insert(restored_id.clone(), Arc::new(Mutex::new(session)));

        tracing::info!(session = restored_id.as_str(), source = source, "session restored");
        Ok(restored_id)
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// One maintenance pass: reap expired/idle sessions, prune per-session
    /// TTL data, trim the idle pool, refresh the resource snapshot.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let now = chrono::Utc::now();

        let handles: Vec<(String, Arc<Mutex<Session>>)> = {
            let sessions = self.sessions.lock().expect("session registry lock poisoned");
            sessions
                .iter()
                .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
                .collect()
        };

        let mut expired: Vec<String> = Vec::new();
        for (id, handle) in handles {
            let mut session = handle.lock().expect("session lock poisoned");
            report.entries_reaped += session.reap_expired();
            if session.is_expired(now, self.config.idle_timeout_secs) {
                expired.push(id);
            }
        }

        for id in expired {
            if self.close_session(&id).await.is_ok() {
                report.sessions_reaped += 1;
            }
        }

        report.idle_discarded = self.pool.discard_stale();
        self.pool.top_up();
        self.monitor.refresh();

        if report != MaintenanceReport::default() {
            tracing::info!(
                sessions_reaped = report.sessions_reaped,
                entries_reaped = report.entries_reaped,
                idle_discarded = report.idle_discarded,
                "maintenance pass complete"
            );
        }
        report
    }

    pub fn spawn_maintenance_loop(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let interval = Duration::from_secs(self.config.maintenance_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                orchestrator.run_maintenance().await;
            }
            tracing::debug!("maintenance loop stopped");
        })
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub fn select_instance(&self, config: &SessionConfig) -> String {
        self.balancer.select_instance(config)
    }

    pub fn update_instance_stats(&self, instance: &str, connections: u64, load: f64) {
        self.balancer.update_stats(instance, connections, load);
    }

    pub fn status(&self) -> OrchestratorStatus {
        let (active, migrating) = {
            let sessions = self.sessions.lock().expect("session registry lock poisoned");
            let migrating = sessions
                .values()
                .filter(|handle| handle.lock().expect("session lock poisoned").is_migrating)
                .count();
            (sessions.len(), migrating)
        };
        OrchestratorStatus {
            active_sessions: active,
            migrating_sessions: migrating,
            pool: self.pool.stats(),
            resources: self.monitor.snapshot(),
            instances: self.balancer.stats(),
        }
    }
}
