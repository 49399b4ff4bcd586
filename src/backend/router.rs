//! Backend selection, retry, and fallback.
//!
//! The router owns no request state: given a classified task it builds an
//! ordered chain of eligible backends, retries transport-layer failures with
//! exponential backoff, and advances down the chain on exhaustion. Clients
//! never retry; this is the only retry site in the crate.

use super::BackendId;
use super::health::HealthRegistry;
use super::traits::Backend;
use crate::delegation::pressure::PressureGauge;
use crate::error::{ErrorKind, RouteError};
use crate::task::{Complexity, ExecutionResult, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// L1/L2 tasks above this token estimate prefer the local chain outright.
pub const LOCAL_HEAVY_THRESHOLD: u64 = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Attempts per backend before advancing down the chain.
    pub max_attempts: u32,
    /// Base unit for exponential backoff; attempt `n` sleeps `base * 2^n`.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
        }
    }
}

pub struct Router {
    backends: HashMap<BackendId, Arc<dyn Backend>>,
    registry: Arc<HealthRegistry>,
    pressure: Arc<PressureGauge>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        backends: HashMap<BackendId, Arc<dyn Backend>>,
        registry: Arc<HealthRegistry>,
        pressure: Arc<PressureGauge>,
        config: RouterConfig,
    ) -> Self {
        Self {
            backends,
            registry,
            pressure,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn backend(&self, id: BackendId) -> Option<&Arc<dyn Backend>> {
        self.backends.get(&id)
    }

    /// Build the selection chain for a task. Candidates the registry already
    /// shows unhealthy (or that were never configured) are dropped here; an
    /// empty chain surfaces as `NO_EXECUTOR` before any attempt is made.
    pub fn select_chain(&self, task: &Task, preferred: Option<BackendId>) -> Vec<BackendId> {
        if let Some(forced) = task.hints.force_executor {
            return self.filter_usable(&[forced]);
        }

        let mut chain: Vec<BackendId> = Vec::with_capacity(4);
        if let Some(preferred) = preferred
            && self.registry.is_healthy(preferred)
        {
            chain.push(preferred);
        }

        let level = task.complexity.map_or(1, Complexity::level);
        let default_chain: &[BackendId] = match level {
            1 | 2 => &[
                BackendId::Local,
                BackendId::HeadlessA,
                BackendId::HeadlessB,
                BackendId::Main,
            ],
            3 => &[BackendId::Main, BackendId::HeadlessA, BackendId::Local],
            _ => &[BackendId::Main],
        };
        for &id in default_chain {
            if !chain.contains(&id) {
                chain.push(id);
            }
        }

        self.filter_usable(&chain)
    }

    /// Drop unconfigured or unhealthy backends from a candidate chain.
    pub fn filter_usable(&self, chain: &[BackendId]) -> Vec<BackendId> {
        chain
            .iter()
            .copied()
            .filter(|id| self.backends.contains_key(id) && self.registry.is_healthy(*id))
            .collect()
    }

    /// Route and execute with the default selection chain.
    pub async fn execute(
        &self,
        task: &Task,
        preferred: Option<BackendId>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, RouteError> {
        let chain = self.select_chain(task, preferred);
        self.execute_with_chain(task, &chain, cancel).await
    }

    /// Route and execute over an explicit chain (used by the delegation
    /// engine's mode overrides, which pin the eligible backend set).
    pub async fn execute_with_chain(
        &self,
        task: &Task,
        chain: &[BackendId],
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, RouteError> {
        if chain.is_empty() {
            return Err(RouteError::NoExecutor {
                task_id: task.id.clone(),
                reason: "selection chain is empty (forced or pinned backend unavailable)".into(),
            });
        }

        let mut failures: Vec<String> = Vec::new();
        let mut attempted = false;

        for &backend_id in chain {
            let Some(backend) = self.backends.get(&backend_id) else {
                continue;
            };

            for attempt in 0..self.config.max_attempts {
                if task.remaining_deadline(chrono::Utc::now()) == Some(Duration::ZERO) {
                    return Err(RouteError::DeadlineExceeded {
                        task_id: task.id.clone(),
                    });
                }

                attempted = true;
                let result = backend.execute(task, cancel).await;

                if backend_id == BackendId::Main {
                    self.pressure.record_latency(result.duration_ms);
                }

                if result.is_ok() {
                    if attempt > 0 {
                        tracing::info!(
                            backend = %backend_id,
                            attempt,
                            "backend recovered after retries"
                        );
                    }
                    return Ok(result);
                }

                for error in &result.errors {
                    failures.push(format!(
                        "{backend_id} attempt {}/{}: {} ({})",
                        attempt + 1,
                        self.config.max_attempts,
                        error.message,
                        error.kind
                    ));
                }

                if result.errors.iter().any(|e| e.kind == ErrorKind::TooLarge) {
                    // Oversized for this envelope; a retry cannot help but a
                    // larger backend further down the chain might.
                    tracing::warn!(backend = %backend_id, "task exceeds envelope, advancing chain");
                    break;
                }

                if !result.only_retriable_errors() {
                    tracing::warn!(
                        backend = %backend_id,
                        "non-retryable error, switching backend"
                    );
                    break;
                }

                if attempt + 1 < self.config.max_attempts {
                    let backoff = self.backoff(attempt, task);
                    tracing::warn!(
                        backend = %backend_id,
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "backend call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }

            tracing::warn!(backend = %backend_id, "switching to fallback backend");
        }

        if attempted {
            Err(RouteError::BackendUnavailable {
                task_id: task.id.clone(),
                attempts: failures.join("; "),
            })
        } else {
            Err(RouteError::NoExecutor {
                task_id: task.id.clone(),
                reason: "no configured backend in chain".into(),
            })
        }
    }

    /// `base * 2^attempt`, capped, and never sleeping past the deadline.
    fn backoff(&self, attempt: u32, task: &Task) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt);
        let backoff_ms = self
            .config
            .backoff_base_ms
            .saturating_mul(multiplier)
            .min(self.config.backoff_cap_ms);
        let backoff = Duration::from_millis(backoff_ms);
        match task.remaining_deadline(chrono::Utc::now()) {
            Some(remaining) => backoff.min(remaining),
            None => backoff,
        }
    }
}
