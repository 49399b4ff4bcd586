use super::BackendId;
use super::health::HealthRecord;
use crate::task::{ExecutionResult, Task};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A single executor client. Implementations are internally thread-safe and
/// never retry; retries and fallback belong to the router. Backend failures
/// come back as error records on the result, not as `Err`.
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Hard request envelope in tokens.
    fn max_tokens(&self) -> u64;

    /// Issue one request. The implementation enforces the envelope before
    /// any wire call (`TOO_LARGE`), honours `min(remaining deadline,
    /// configured timeout)`, and reports health marks to the registry.
    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> ExecutionResult;

    /// Cheap capability check, hard-capped at five seconds.
    async fn probe(&self) -> HealthRecord;
}

/// Probe timeout shared by every client.
pub const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
