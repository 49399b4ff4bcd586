//! Cognitive delegation.
//!
//! Combines the classifier, the mode override, the pressure gauge, and the
//! router into one decision: execute on a single backend, or decompose into
//! a led plan. The engine runs plan phases strictly in order; fan-out across
//! personas belongs to the coordinator.

use super::decompose::{DecompositionPlan, Leader, decompose_heavy_complex, decompose_reasoning};
use super::mode::{self, ExecutionMode};
use super::pressure::PressureGauge;
use crate::backend::{BackendId, Router};
use crate::classifier::classify_task;
use crate::error::{ErrorKind, Result, RouteError};
use crate::persona::Persona;
use crate::task::{
    Complexity, ErrorRecord, ExecutionResult, Task, payload_invoked_tools, payload_text_len,
    score_confidence,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct DelegationConfig {
    /// L4/L5 tasks above this estimate decompose instead of running whole.
    pub heavy_token_threshold: u64,
    /// L1/L2 tasks above this estimate stay local outright.
    pub local_heavy_threshold: u64,
    /// L1/L2 tasks declaring more tools than this stay local.
    pub tool_threshold: usize,
    /// Main pressure above this triggers context preservation.
    pub pressure_threshold: f64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            heavy_token_threshold: 100_000,
            local_heavy_threshold: crate::backend::router::LOCAL_HEAVY_THRESHOLD,
            tool_threshold: 3,
            pressure_threshold: 0.5,
        }
    }
}

/// How a decided task reaches its executor(s).
#[derive(Debug)]
pub enum Routing {
    /// Default selection rules, optionally seeded with a preferred backend.
    Chain { preferred: Option<BackendId> },
    /// Mode overrides and forced hints pin the eligible set outright.
    Pinned { chain: Vec<BackendId> },
    Decompose { plan: DecompositionPlan },
}

#[derive(Debug)]
pub struct Decision {
    pub routing: Routing,
    pub reason: String,
    pub confidence: f64,
}

pub struct DelegationEngine {
    router: Arc<Router>,
    pressure: Arc<PressureGauge>,
    config: DelegationConfig,
    stats: super::stats::DelegationStats,
}

impl DelegationEngine {
    pub fn new(
        router: Arc<Router>,
        pressure: Arc<PressureGauge>,
        config: DelegationConfig,
    ) -> Self {
        Self {
            router,
            pressure,
            config,
            stats: super::stats::DelegationStats::new(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn stats(&self) -> super::stats::DelegationStatsSnapshot {
        self.stats.snapshot()
    }

    /// Classify the task and decide its routing. The mode override is
    /// consulted first; the force-executor hint beats everything.
    pub fn decide(&self, task: &mut Task, persona: Option<&Persona>) -> Decision {
        classify_task(task);

        if let Some(forced) = task.hints.force_executor {
            return Decision {
                routing: Routing::Pinned {
                    chain: vec![forced],
                },
                reason: format!("forced to {forced} by caller"),
                confidence: 1.0,
            };
        }

        match mode::current() {
            ExecutionMode::FullLocal => {
                return Decision {
                    routing: Routing::Pinned {
                        chain: vec![BackendId::Local],
                    },
                    reason: "mode override: full_local".into(),
                    confidence: 0.9,
                };
            }
            ExecutionMode::ClaudeOnly => {
                return Decision {
                    routing: Routing::Pinned {
                        chain: vec![BackendId::Main],
                    },
                    reason: "mode override: claude_only".into(),
                    confidence: 0.95,
                };
            }
            ExecutionMode::Hybrid => {
                let chain = match persona {
                    Some(p) if !p.is_core => vec![BackendId::Local, BackendId::Main],
                    _ => vec![BackendId::Main],
                };
                return Decision {
                    routing: Routing::Pinned { chain },
                    reason: "mode override: hybrid".into(),
                    confidence: 0.9,
                };
            }
            ExecutionMode::Auto => {}
        }

        self.decide_auto(task)
    }

    fn decide_auto(&self, task: &Task) -> Decision {
        let complexity = task.complexity.unwrap_or(Complexity::Mechanical);
        let level = complexity.level();
        let pressure = self.pressure.value();

        if level >= 4 {
            if task.estimated_tokens > self.config.heavy_token_threshold {
                let plan = decompose_heavy_complex(task);
                return Decision {
                    reason: plan.reason.clone(),
                    routing: Routing::Decompose { plan },
                    confidence: 0.9,
                };
            }
            return Decision {
                routing: Routing::Chain {
                    preferred: Some(BackendId::Main),
                },
                reason: format!("high cognitive complexity ({complexity})"),
                confidence: 0.95,
            };
        }

        if level == 3 {
            if pressure > self.config.pressure_threshold {
                let plan = decompose_reasoning(task);
                return Decision {
                    reason: plan.reason.clone(),
                    routing: Routing::Decompose { plan },
                    confidence: 0.8,
                };
            }
            return Decision {
                routing: Routing::Chain {
                    preferred: Some(BackendId::Main),
                },
                reason: "reasoning required".into(),
                confidence: 0.85,
            };
        }

        // L1/L2 from here down.
        if task.estimated_tokens > self.config.local_heavy_threshold {
            return Decision {
                routing: Routing::Chain {
                    preferred: Some(BackendId::Local),
                },
                reason: format!("heavy but simple (tokens={})", task.estimated_tokens),
                confidence: 0.95,
            };
        }

        if task.required_tools.len() > self.config.tool_threshold {
            return Decision {
                routing: Routing::Chain {
                    preferred: Some(BackendId::Local),
                },
                reason: format!("tool-intensive task ({} tools)", task.required_tools.len()),
                confidence: 0.9,
            };
        }

        if pressure > self.config.pressure_threshold {
            return Decision {
                routing: Routing::Chain {
                    preferred: Some(BackendId::Local),
                },
                reason: "preserving main context".into(),
                confidence: 0.85,
            };
        }

        Decision {
            routing: Routing::Chain {
                preferred: Some(complexity.affinity()),
            },
            reason: format!("default routing for {complexity}"),
            confidence: 0.7,
        }
    }

    /// Decide and execute. Single executions go through the router; plans run
    /// their phases in order with results threaded through `prior_results`.
    pub async fn run(
        &self,
        mut task: Task,
        persona: Option<&Persona>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        if let Some(persona) = persona {
            task.hints.force_persona.get_or_insert_with(|| persona.id.clone());
        }
        let decision = self.decide(&mut task, persona);
        tracing::debug!(
            task = task.id.as_str(),
            reason = decision.reason.as_str(),
            confidence = decision.confidence,
            "delegation decided"
        );

        match decision.routing {
            Routing::Chain { preferred } => {
                let target = preferred.map_or_else(|| "auto".to_string(), |b| b.to_string());
                self.stats.record(&target, task.complexity, false);
                Ok(self.router.execute(&task, preferred, cancel).await?)
            }
            Routing::Pinned { chain } => {
                let target = chain
                    .first()
                    .map_or_else(|| "none".to_string(), ToString::to_string);
                self.stats.record(&target, task.complexity, false);
                let usable = self.router.filter_usable(&chain);
                Ok(self.router.execute_with_chain(&task, &usable, cancel).await?)
            }
            Routing::Decompose { plan } => {
                self.stats.record("hybrid", task.complexity, true);
                self.run_plan(&task, plan, cancel).await
            }
        }
    }

    /// Execute a decomposition plan: local phase first, then main phase,
    /// threading every prior payload into the next sub-task's context.
    /// Leader-phase failure aborts; follower failure degrades to partial.
    pub async fn run_plan(
        &self,
        parent: &Task,
        plan: DecompositionPlan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let mut prior_results: Vec<Value> = Vec::new();
        let mut local_contributions: Vec<Value> = Vec::new();
        let mut main_contributions: Vec<Value> = Vec::new();
        let mut total_tokens: u64 = 0;
        let mut partial = false;
        let mut follower_errors: Vec<ErrorRecord> = Vec::new();

        let local_chain = [BackendId::Local, BackendId::HeadlessA, BackendId::HeadlessB];
        let main_chain = [BackendId::Main];

        let phases = [
            (Leader::Local, &plan.local_phase, &local_chain[..]),
            (Leader::Main, &plan.main_phase, &main_chain[..]),
        ];

        for (phase_owner, sub_tasks, chain) in phases {
            let is_leader_phase = phase_owner == plan.leader;

            for sub_task in sub_tasks {
                let mut sub_task = sub_task.clone();
                if !prior_results.is_empty() {
                    sub_task
                        .context
                        .insert("prior_results".to_string(), Value::Array(prior_results.clone()));
                }

                let result = match self.execute_sub_task(&sub_task, chain, cancel).await {
                    Ok(result) => result,
                    Err(e) => ExecutionResult::failed(
                        &sub_task.id,
                        "hybrid",
                        0,
                        ErrorRecord::new(e.kind(), e.to_string()),
                    ),
                };

                total_tokens += result.tokens_used;

                if result.is_ok() {
                    prior_results.push(result.payload.clone());
                    let contribution = json!({
                        "task_id": result.task_id,
                        "result": result.payload,
                        "confidence": result.confidence,
                    });
                    match phase_owner {
                        Leader::Local => local_contributions.push(contribution),
                        Leader::Main => main_contributions.push(contribution),
                    }
                } else if is_leader_phase {
                    tracing::warn!(
                        sub_task = sub_task.id.as_str(),
                        "leader phase sub-task failed, aborting plan"
                    );
                    let mut aborted = result;
                    aborted.task_id = parent.id.clone();
                    aborted.executor = "hybrid".to_string();
                    aborted.tokens_used = total_tokens;
                    aborted.duration_ms = elapsed_ms(started);
                    return Ok(aborted);
                } else {
                    tracing::warn!(
                        sub_task = sub_task.id.as_str(),
                        "follower phase sub-task failed, continuing partial"
                    );
                    partial = true;
                    follower_errors.extend(result.errors);
                }
            }
        }

        let final_result = match plan.leader {
            Leader::Main => main_contributions
                .last()
                .and_then(|c| c.get("result"))
                .cloned()
                .unwrap_or(Value::Null),
            Leader::Local => json!({
                "data": local_contributions
                    .last()
                    .and_then(|c| c.get("result"))
                    .cloned()
                    .unwrap_or(Value::Null),
                "analysis": main_contributions
                    .last()
                    .and_then(|c| c.get("result"))
                    .cloned()
                    .unwrap_or(Value::Null),
            }),
        };

        let payload = json!({
            "task_id": parent.id,
            "execution_mode": "hybrid",
            "local_contributions": local_contributions,
            "main_contributions": main_contributions,
            "final_result": final_result,
        });

        let confidence = score_confidence(
            parent.complexity,
            payload_invoked_tools(&payload),
            payload_text_len(&payload),
        );

        Ok(ExecutionResult {
            task_id: parent.id.clone(),
            executor: "hybrid".to_string(),
            payload,
            tokens_used: total_tokens,
            duration_ms: elapsed_ms(started),
            confidence,
            errors: follower_errors,
            cached: false,
            partial,
        })
    }

    /// Envelope re-check against the phase's primary backend, then route over
    /// the pinned phase chain.
    async fn execute_sub_task(
        &self,
        sub_task: &Task,
        chain: &[BackendId],
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        if let Some(&primary) = chain.first()
            && let Some(backend) = self.router.backend(primary)
            && sub_task.estimated_tokens > backend.max_tokens()
        {
            return Err(RouteError::TooLarge {
                task_id: sub_task.id.clone(),
                backend: primary.to_string(),
                estimated: sub_task.estimated_tokens,
                max: backend.max_tokens(),
            }
            .into());
        }

        let usable = self.router.filter_usable(chain);
        Ok(self.router.execute_with_chain(sub_task, &usable, cancel).await?)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::health::{HealthRecord, HealthRegistry};
    use crate::backend::router::RouterConfig;
    use crate::backend::traits::Backend;
    use crate::task::TaskKind;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingBackend {
        id: BackendId,
        calls: Arc<AtomicUsize>,
        seen_context_keys: Arc<Mutex<Vec<Vec<String>>>>,
        fail: bool,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
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
            self.seen_context_keys
                .lock()
                .unwrap()
                .push(task.context.keys().cloned().collect());
            if self.fail {
                return ExecutionResult::failed(
                    &task.id,
                    self.id.to_string(),
                    1,
                    ErrorRecord::new(ErrorKind::Transport, "mock down"),
                );
            }
            ExecutionResult {
                task_id: task.id.clone(),
                executor: self.id.to_string(),
                payload: json!({"content": format!("{} on {}", task.id, self.id)}),
                tokens_used: 100,
                duration_ms: 1,
                confidence: 0.9,
                errors: Vec::new(),
                cached: false,
                partial: false,
            }
        }

        async fn probe(&self) -> HealthRecord {
            HealthRecord::up(self.id, 1)
        }
    }

    struct Harness {
        engine: DelegationEngine,
        pressure: Arc<PressureGauge>,
        main_calls: Arc<AtomicUsize>,
        local_calls: Arc<AtomicUsize>,
        local_contexts: Arc<Mutex<Vec<Vec<String>>>>,
        main_contexts: Arc<Mutex<Vec<Vec<String>>>>,
    }

    fn harness(fail_main: bool, fail_local: bool) -> Harness {
        let registry = Arc::new(HealthRegistry::new(&BackendId::ALL));
        let pressure = Arc::new(PressureGauge::new());
        let main_calls = Arc::new(AtomicUsize::new(0));
        let local_calls = Arc::new(AtomicUsize::new(0));
        let local_contexts = Arc::new(Mutex::new(Vec::new()));
        let main_contexts = Arc::new(Mutex::new(Vec::new()));

        let mut backends: HashMap<BackendId, Arc<dyn Backend>> = HashMap::new();
        backends.insert(
            BackendId::Main,
            Arc::new(RecordingBackend {
                id: BackendId::Main,
                calls: Arc::clone(&main_calls),
                seen_context_keys: Arc::clone(&main_contexts),
                fail: fail_main,
            }),
        );
        backends.insert(
            BackendId::Local,
            Arc::new(RecordingBackend {
                id: BackendId::Local,
                calls: Arc::clone(&local_calls),
                seen_context_keys: Arc::clone(&local_contexts),
                fail: fail_local,
            }),
        );

        let router = Arc::new(Router::new(
            backends,
            registry,
            Arc::clone(&pressure),
            RouterConfig {
                max_attempts: 1,
                backoff_base_ms: 1,
                backoff_cap_ms: 2,
            },
        ));

        Harness {
            engine: DelegationEngine::new(
                Arc::clone(&router),
                Arc::clone(&pressure),
                DelegationConfig::default(),
            ),
            pressure,
            main_calls,
            local_calls,
            local_contexts,
            main_contexts,
        }
    }

    #[test]
    fn forced_executor_beats_mode_and_table() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::FullLocal);
        let h = harness(false, false);
        let mut task = Task::new("anything").with_estimated_tokens(10);
        task.hints.force_executor = Some(BackendId::HeadlessB);
        let decision = h.engine.decide(&mut task, None);
        mode::set(ExecutionMode::Auto);
        match decision.routing {
            Routing::Pinned { chain } => assert_eq!(chain, vec![BackendId::HeadlessB]),
            other => panic!("expected pinned routing, got {other:?}"),
        }
        assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_table_decides_by_level_and_load() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Auto);
        let h = harness(false, false);

        // L5 heavy: decompose, main leads.
        let mut task = Task::new("x")
            .with_kind(TaskKind::ArchitectureDesign)
            .with_estimated_tokens(150_000);
        match h.engine.decide(&mut task, None).routing {
            Routing::Decompose { plan } => assert_eq!(plan.leader, Leader::Main),
            other => panic!("expected decompose, got {other:?}"),
        }

        // L5 light: single main.
        let mut task = Task::new("x")
            .with_kind(TaskKind::ArchitectureDesign)
            .with_estimated_tokens(5_000);
        match h.engine.decide(&mut task, None).routing {
            Routing::Chain { preferred } => assert_eq!(preferred, Some(BackendId::Main)),
            other => panic!("expected chain, got {other:?}"),
        }

        // L2 heavy: local.
        let mut task = Task::new("x")
            .with_kind(TaskKind::LogAnalysis)
            .with_estimated_tokens(50_000);
        match h.engine.decide(&mut task, None).routing {
            Routing::Chain { preferred } => assert_eq!(preferred, Some(BackendId::Local)),
            other => panic!("expected chain, got {other:?}"),
        }

        // L1 tool-heavy: local.
        let mut task = Task::new("x").with_kind(TaskKind::RunCommand);
        for tool in ["a", "b", "c", "d"] {
            task.required_tools.insert(tool.to_string());
        }
        match h.engine.decide(&mut task, None).routing {
            Routing::Chain { preferred } => assert_eq!(preferred, Some(BackendId::Local)),
            other => panic!("expected chain, got {other:?}"),
        }
    }

    #[test]
    fn reasoning_under_pressure_decomposes_local_led() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Auto);
        let h = harness(false, false);
        h.pressure.set_latency_ewma_ms(60_000.0); // saturates latency share -> 0.5+
        for _ in 0..16 {
            h.pressure.enqueue();
        }
        assert!(h.pressure.value() > 0.5);

        let mut task = Task::new("debug flaky test")
            .with_kind(TaskKind::DebugAnalysis)
            .with_estimated_tokens(10_000);
        match h.engine.decide(&mut task, None).routing {
            Routing::Decompose { plan } => {
                assert_eq!(plan.leader, Leader::Local);
                assert_eq!(plan.local_phase[0].kind, Some(TaskKind::FactGathering));
                assert_eq!(plan.main_phase[0].kind, Some(TaskKind::Reasoning));
            }
            other => panic!("expected decompose, got {other:?}"),
        }
    }

    #[test]
    fn hybrid_mode_splits_core_and_support() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Hybrid);
        let h = harness(false, false);
        let registry = crate::persona::PersonaRegistry::default();

        let mut task = Task::new("x").with_estimated_tokens(10);
        let core = registry.get("athena").unwrap();
        match h.engine.decide(&mut task, Some(core)).routing {
            Routing::Pinned { chain } => assert_eq!(chain, vec![BackendId::Main]),
            other => panic!("expected pinned, got {other:?}"),
        }

        let mut task = Task::new("x").with_estimated_tokens(10);
        let support = registry.get("seshat").unwrap();
        match h.engine.decide(&mut task, Some(support)).routing {
            Routing::Pinned { chain } => {
                assert_eq!(chain, vec![BackendId::Local, BackendId::Main]);
            }
            other => panic!("expected pinned, got {other:?}"),
        }
        mode::set(ExecutionMode::Auto);
    }

    #[tokio::test]
    async fn full_local_with_local_down_never_touches_main() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::FullLocal);
        let h = harness(false, true);
        // Local reads unhealthy in the registry.
        for _ in 0..3 {
            h.engine.router().registry().mark_failure(BackendId::Local);
        }

        let task = Task::new("list files").with_estimated_tokens(10);
        let err = h
            .engine
            .run(task, None, &CancellationToken::new())
            .await
            .unwrap_err();
        mode::set(ExecutionMode::Auto);

        assert_eq!(err.kind(), ErrorKind::NoExecutor);
        assert_eq!(h.main_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plan_threads_prior_results_and_synthesizes_main_led() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Auto);
        let h = harness(false, false);
        let mut parent = Task::new("design e-commerce microservices")
            .with_kind(TaskKind::ArchitectureDesign)
            .with_estimated_tokens(150_000);
        classify_task(&mut parent);
        let plan = decompose_heavy_complex(&parent);

        let result = h
            .engine
            .run_plan(&parent, plan, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(result.executor, "hybrid");
        assert_eq!(result.tokens_used, 400);
        assert_eq!(result.payload["local_contributions"].as_array().unwrap().len(), 2);
        assert_eq!(result.payload["main_contributions"].as_array().unwrap().len(), 2);
        // Main leads: the final result is the last main contribution.
        assert_eq!(
            result.payload["final_result"],
            result.payload["main_contributions"][1]["result"]
        );

        // First sub-task saw no prior results; every later one did.
        let local_seen = h.local_contexts.lock().unwrap();
        assert!(!local_seen[0].contains(&"prior_results".to_string()));
        assert!(local_seen[1].contains(&"prior_results".to_string()));
        let main_seen = h.main_contexts.lock().unwrap();
        assert!(main_seen.iter().all(|keys| keys.contains(&"prior_results".to_string())));
    }

    #[tokio::test]
    async fn follower_failure_degrades_to_partial() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Auto);
        // Local (follower for a main-led plan) fails; main succeeds.
        let h = harness(false, true);
        let mut parent = Task::new("design the system")
            .with_kind(TaskKind::SystemDesign)
            .with_estimated_tokens(150_000);
        classify_task(&mut parent);
        let plan = decompose_heavy_complex(&parent);

        let result = h
            .engine
            .run_plan(&parent, plan, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.partial);
        assert!(!result.errors.is_empty());
        assert_eq!(result.executor, "hybrid");
        // Main phase still produced the synthesis.
        assert!(result.payload["final_result"].is_object());
    }

    #[tokio::test]
    async fn leader_failure_aborts_plan() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Auto);
        // Main (leader) fails.
        let h = harness(true, false);
        let mut parent = Task::new("design the system")
            .with_kind(TaskKind::SystemDesign)
            .with_estimated_tokens(150_000);
        classify_task(&mut parent);
        let plan = decompose_heavy_complex(&parent);

        let result = h
            .engine
            .run_plan(&parent, plan, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.is_ok());
        assert_eq!(result.task_id, parent.id);
        assert_eq!(result.executor, "hybrid");
    }

    #[tokio::test]
    async fn oversized_sub_task_fails_envelope_recheck() {
        let _guard = mode::TEST_MODE_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mode::set(ExecutionMode::Auto);
        let h = harness(false, false);
        let mut parent = Task::new("huge design")
            .with_kind(TaskKind::ArchitectureDesign)
            .with_estimated_tokens(400_000);
        classify_task(&mut parent);
        let plan = decompose_heavy_complex(&parent);
        // local_1 inherits 200k tokens, above the local 120k envelope.
        assert_eq!(plan.local_phase[0].estimated_tokens, 200_000);

        let result = h
            .engine
            .run_plan(&parent, plan, &CancellationToken::new())
            .await
            .unwrap();

        // Local phase is the follower here (main leads), so the plan degrades.
        assert!(result.partial);
        assert!(result.errors.iter().any(|e| e.kind == ErrorKind::TooLarge));
        assert_eq!(h.local_calls.load(Ordering::SeqCst), 1); // only local_2 ran
    }
}
