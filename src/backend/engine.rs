//! Client for the main engine. The engine's protocol is opaque to the core:
//! we send `{persona, task, context, force_executor?}` and take back
//! `{success, result|error, persona, executor, duration, timestamp}`.

use super::health::{HealthRecord, HealthRegistry};
use super::traits::{Backend, PROBE_TIMEOUT};
use super::{BackendConfig, BackendId};
use crate::error::ErrorKind;
use crate::task::{
    ErrorRecord, ExecutionResult, Task, payload_invoked_tools, payload_text_len, score_confidence,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct EngineBackend {
    config: BackendConfig,
    registry: Arc<HealthRegistry>,
    cached_auth: Option<String>,
    execute_url: String,
    health_url: String,
    client: Client,
}

impl EngineBackend {
    pub fn new(config: BackendConfig, registry: Arc<HealthRegistry>) -> Self {
        let base = config.endpoint.trim_end_matches('/').to_string();
        let execute_url = format!("{base}/execute");
        let health_url = format!("{base}/health");
        let cached_auth = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| format!("Bearer {key}"));

        Self {
            config,
            registry,
            cached_auth,
            execute_url,
            health_url,
            client: Client::new(),
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(auth) = &self.cached_auth {
            req.header("Authorization", auth)
        } else {
            req
        }
    }
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    executor: Option<String>,
}

#[async_trait]
impl Backend for EngineBackend {
    fn id(&self) -> BackendId {
        BackendId::Main
    }

    fn max_tokens(&self) -> u64 {
        self.config.max_tokens
    }

    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> ExecutionResult {
        let started = Instant::now();

        if task.estimated_tokens > self.config.max_tokens {
            return ExecutionResult::failed(
                &task.id,
                BackendId::Main.to_string(),
                0,
                ErrorRecord::new(
                    ErrorKind::TooLarge,
                    format!(
                        "estimated {} tokens exceeds main envelope of {}",
                        task.estimated_tokens, self.config.max_tokens
                    ),
                ),
            );
        }

        let persona = task
            .hints
            .force_persona
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let body = json!({
            "persona": persona,
            "task": task.description,
            "context": task.context,
            "force_executor": task.hints.force_executor,
        });

        let timeout = match task.remaining_deadline(chrono::Utc::now()) {
            Some(remaining) => remaining.min(self.config.timeout()),
            None => self.config.timeout(),
        };

        let send = self
            .apply_auth(self.client.post(&self.execute_url))
            .timeout(timeout)
            .json(&body)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return ExecutionResult::failed(
                    &task.id,
                    BackendId::Main.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(ErrorKind::Timeout, "request cancelled"),
                );
            }
            response = send => response,
        };

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                self.registry.mark_failure(BackendId::Main);
                let status = response.status();
                return ExecutionResult::failed(
                    &task.id,
                    BackendId::Main.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(ErrorKind::Transport, format!("engine error ({status})")),
                );
            }
            Err(e) => {
                self.registry.mark_failure(BackendId::Main);
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Transport
                };
                return ExecutionResult::failed(
                    &task.id,
                    BackendId::Main.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(kind, e.to_string()),
                );
            }
        };

        let body: EngineResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                self.registry.mark_failure(BackendId::Main);
                return ExecutionResult::failed(
                    &task.id,
                    BackendId::Main.to_string(),
                    elapsed_ms(started),
                    ErrorRecord::new(ErrorKind::Transport, format!("JSON decode failed: {e}")),
                );
            }
        };

        let duration_ms = elapsed_ms(started);

        if !body.success {
            self.registry.mark_failure(BackendId::Main);
            return ExecutionResult::failed(
                &task.id,
                BackendId::Main.to_string(),
                duration_ms,
                ErrorRecord::new(
                    ErrorKind::Transport,
                    body.error.unwrap_or_else(|| "engine reported failure".to_string()),
                ),
            );
        }

        self.registry.mark_success(BackendId::Main, duration_ms);

        let payload = body.result.unwrap_or(Value::Null);
        let confidence = score_confidence(
            task.complexity,
            payload_invoked_tools(&payload),
            payload_text_len(&payload),
        );

        ExecutionResult {
            task_id: task.id.clone(),
            executor: body
                .executor
                .unwrap_or_else(|| BackendId::Main.to_string()),
            payload,
            tokens_used: 0,
            duration_ms,
            confidence,
            errors: Vec::new(),
            cached: false,
            partial: false,
        }
    }

    async fn probe(&self) -> HealthRecord {
        let started = Instant::now();
        let request = self
            .apply_auth(self.client.get(&self.health_url))
            .timeout(PROBE_TIMEOUT)
            .send();

        match request.await {
            Ok(response) if response.status().is_success() => {
                HealthRecord::up(BackendId::Main, elapsed_ms(started))
            }
            Ok(_) | Err(_) => HealthRecord::down(BackendId::Main),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
