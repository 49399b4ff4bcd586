//! Shared mock backends for wire-level scenario tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use trinitas::backend::health::HealthRecord;
use trinitas::backend::router::{Router, RouterConfig};
use trinitas::backend::{Backend, BackendId, HealthRegistry};
use trinitas::collab::Coordinator;
use trinitas::delegation::{DelegationConfig, DelegationEngine, PressureGauge};
use trinitas::error::ErrorKind;
use trinitas::persona::PersonaRegistry;
use trinitas::task::{ErrorRecord, ExecutionResult, Task};

pub struct MockBackend {
    pub id: BackendId,
    pub calls: Arc<AtomicUsize>,
    pub down: bool,
    pub reply: Value,
    /// Fail only calls attributed to this persona.
    pub fail_for_persona: Option<String>,
}

impl MockBackend {
    pub fn up(id: BackendId) -> Self {
        Self {
            id,
            calls: Arc::new(AtomicUsize::new(0)),
            down: false,
            reply: json!({"content": format!("handled by {id}")}),
            fail_for_persona: None,
        }
    }

    pub fn down(id: BackendId) -> Self {
        Self {
            down: true,
            ..Self::up(id)
        }
    }

    pub fn replying(id: BackendId, reply: Value) -> Self {
        Self {
            reply,
            ..Self::up(id)
        }
    }

    pub fn failing_for(id: BackendId, persona: &str) -> Self {
        Self {
            fail_for_persona: Some(persona.to_string()),
            ..Self::up(id)
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn max_tokens(&self) -> u64 {
        match self.id {
            BackendId::Main => 200_000,
            _ => 120_000,
        }
    }

    async fn execute(&self, task: &Task, _cancel: &CancellationToken) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let persona_blocked = self
            .fail_for_persona
            .as_deref()
            .is_some_and(|p| task.hints.force_persona.as_deref() == Some(p));
        if self.down || persona_blocked {
            return ExecutionResult::failed(
                &task.id,
                self.id.to_string(),
                1,
                ErrorRecord::new(ErrorKind::Transport, "connection refused"),
            );
        }
        let payload = self.reply.clone();
        let confidence = trinitas::task::score_confidence(
            task.complexity,
            trinitas::task::payload_invoked_tools(&payload),
            trinitas::task::payload_text_len(&payload),
        );
        ExecutionResult {
            task_id: task.id.clone(),
            executor: self.id.to_string(),
            payload,
            tokens_used: 50,
            duration_ms: 1,
            confidence,
            errors: Vec::new(),
            cached: false,
            partial: false,
        }
    }

    async fn probe(&self) -> HealthRecord {
        if self.down {
            HealthRecord::down(self.id)
        } else {
            HealthRecord::up(self.id, 1)
        }
    }
}

pub struct Rig {
    pub engine: Arc<DelegationEngine>,
    pub coordinator: Coordinator,
    pub pressure: Arc<PressureGauge>,
    pub registry: Arc<HealthRegistry>,
    pub calls: HashMap<BackendId, Arc<AtomicUsize>>,
}

/// Wire a delegation engine and coordinator over the given mock backends.
pub fn rig(mocks: Vec<MockBackend>) -> Rig {
    let registry = Arc::new(HealthRegistry::new(&BackendId::ALL));
    let pressure = Arc::new(PressureGauge::new());

    let mut calls = HashMap::new();
    let mut backends: HashMap<BackendId, Arc<dyn Backend>> = HashMap::new();
    for mock in mocks {
        calls.insert(mock.id, Arc::clone(&mock.calls));
        backends.insert(mock.id, Arc::new(mock));
    }

    let router = Arc::new(Router::new(
        backends,
        Arc::clone(&registry),
        Arc::clone(&pressure),
        RouterConfig {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
        },
    ));
    let engine = Arc::new(DelegationEngine::new(
        Arc::clone(&router),
        Arc::clone(&pressure),
        DelegationConfig::default(),
    ));
    let coordinator = Coordinator::new(Arc::clone(&engine), Arc::new(PersonaRegistry::default()));

    Rig {
        engine,
        coordinator,
        pressure,
        registry,
        calls,
    }
}

pub fn call_count(rig: &Rig, id: BackendId) -> usize {
    rig.calls
        .get(&id)
        .map_or(0, |calls| calls.load(Ordering::SeqCst))
}
