//! Multi-persona collaboration.
//!
//! Runs one task across a persona list in one of four modes and folds the
//! contributions into a single outcome. All fan-out happens here; the
//! delegation engine underneath stays strictly per-call. One cancellation
//! token covers every in-flight persona call; results that already landed
//! are preserved.

use super::consensus;
use super::workflow::{self, StepGraph, WorkflowRun};
use super::{CollabMode, CollabOutcome, PersonaRun, PersonaRunStatus};
use crate::delegation::DelegationEngine;
use crate::error::{ErrorKind, Result};
use crate::persona::{Persona, PersonaRegistry};
use crate::task::{ErrorRecord, Task};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Coordinator {
    engine: Arc<DelegationEngine>,
    registry: Arc<PersonaRegistry>,
}

impl Coordinator {
    pub fn new(engine: Arc<DelegationEngine>, registry: Arc<PersonaRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Run `task` across `personas` in `mode`. Unknown personas fail fast
    /// with a validation error; per-persona failures follow the mode's
    /// semantics and land in the outcome instead.
    pub async fn collaborate(
        &self,
        task: Task,
        personas: &[String],
        mode: CollabMode,
        leader: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CollabOutcome> {
        let personas = self.registry.resolve(personas)?;

        match mode {
            CollabMode::Sequential => self.sequential(task, &personas, cancel).await,
            CollabMode::Parallel => self.parallel(task, &personas, cancel).await,
            CollabMode::Hierarchical => self.hierarchical(task, &personas, leader, cancel).await,
            CollabMode::Consensus => self.consensus(task, &personas, cancel).await,
        }
    }

    /// Strict persona order; each sees the previous payload under
    /// `context.previous_result`. The first failure aborts and returns the
    /// accumulated prefix plus the error.
    async fn sequential(
        &self,
        task: Task,
        personas: &[Persona],
        cancel: &CancellationToken,
    ) -> Result<CollabOutcome> {
        let mut runs: Vec<PersonaRun> = Vec::with_capacity(personas.len());
        let mut previous: Option<Value> = None;

        for persona in personas {
            let mut persona_task = task_for_persona(&task, persona);
            if let Some(previous) = &previous {
                persona_task
                    .context
                    .insert("previous_result".to_string(), previous.clone());
            }

            let run = self.run_one(persona, persona_task, cancel).await;
            let failed = run.status != PersonaRunStatus::Completed;
            previous = run.payload().cloned();
            runs.push(run);

            if failed {
                tracing::warn!(
                    persona = persona.id.as_str(),
                    "sequential collaboration aborted"
                );
                return Ok(CollabOutcome {
                    mode: CollabMode::Sequential,
                    task_id: task.id,
                    final_output: None,
                    consensus: None,
                    all_succeeded: false,
                    runs,
                });
            }
        }

        let final_output = runs.last().and_then(|run| run.payload().cloned());
        Ok(CollabOutcome {
            mode: CollabMode::Sequential,
            task_id: task.id,
            final_output,
            consensus: None,
            all_succeeded: true,
            runs,
        })
    }

    /// Independent context copies, concurrent execution, no inter-persona
    /// ordering promise. Failed personas stay in the output marked failed.
    async fn parallel(
        &self,
        task: Task,
        personas: &[Persona],
        cancel: &CancellationToken,
    ) -> Result<CollabOutcome> {
        let runs = self.fan_out(&task, personas, None, cancel).await;
        let all_succeeded = runs
            .iter()
            .all(|run| run.status == PersonaRunStatus::Completed);
        Ok(CollabOutcome {
            mode: CollabMode::Parallel,
            task_id: task.id,
            final_output: None,
            consensus: None,
            all_succeeded,
            runs,
        })
    }

    /// Leader first (explicitly marked, else the first persona); its payload
    /// is injected as `context.leader_guidance` into the subordinates, which
    /// run in parallel. Leader failure aborts; subordinate failure does not.
    async fn hierarchical(
        &self,
        task: Task,
        personas: &[Persona],
        leader: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CollabOutcome> {
        let leader_idx = leader
            .and_then(|id| personas.iter().position(|p| p.id.eq_ignore_ascii_case(id)))
            .unwrap_or(0);
        let leader_persona = &personas[leader_idx];

        let mut leader_task = task_for_persona(&task, leader_persona);
        leader_task.description = format!("Lead planning for: {}", task.description);
        let leader_run = self.run_one(leader_persona, leader_task, cancel).await;

        if leader_run.status != PersonaRunStatus::Completed {
            tracing::warn!(
                persona = leader_persona.id.as_str(),
                "hierarchical leader failed, aborting collaboration"
            );
            return Ok(CollabOutcome {
                mode: CollabMode::Hierarchical,
                task_id: task.id,
                final_output: None,
                consensus: None,
                all_succeeded: false,
                runs: vec![leader_run],
            });
        }

        let guidance = leader_run.payload().cloned();
        let subordinates: Vec<Persona> = personas
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != leader_idx)
            .map(|(_, p)| p.clone())
            .collect();

        let mut runs = vec![leader_run];
        runs.extend(
            self.fan_out(&task, &subordinates, guidance.clone(), cancel)
                .await,
        );

        let all_succeeded = runs
            .iter()
            .all(|run| run.status == PersonaRunStatus::Completed);
        Ok(CollabOutcome {
            mode: CollabMode::Hierarchical,
            task_id: task.id,
            final_output: guidance,
            consensus: None,
            all_succeeded,
            runs,
        })
    }

    /// Parallel execution followed by alignment scoring. Failed personas
    /// contribute the neutral signal.
    async fn consensus(
        &self,
        task: Task,
        personas: &[Persona],
        cancel: &CancellationToken,
    ) -> Result<CollabOutcome> {
        let runs = self.fan_out(&task, personas, None, cancel).await;

        let payloads: Vec<(String, Option<&Value>)> = runs
            .iter()
            .map(|run| (run.persona.clone(), run.payload()))
            .collect();
        let consensus = consensus::evaluate(&payloads);

        let all_succeeded = runs
            .iter()
            .all(|run| run.status == PersonaRunStatus::Completed);
        Ok(CollabOutcome {
            mode: CollabMode::Consensus,
            task_id: task.id,
            final_output: None,
            consensus: Some(consensus),
            all_succeeded,
            runs,
        })
    }

    /// Spawn one engine run per persona and wait for all of them. Join
    /// errors fold into failed runs rather than tearing down the round.
    async fn fan_out(
        &self,
        task: &Task,
        personas: &[Persona],
        leader_guidance: Option<Value>,
        cancel: &CancellationToken,
    ) -> Vec<PersonaRun> {
        let mut handles = Vec::with_capacity(personas.len());

        for persona in personas {
            let mut persona_task = task_for_persona(task, persona);
            if let Some(guidance) = &leader_guidance {
                persona_task.description =
                    format!("Execute under leader direction: {}", task.description);
                persona_task
                    .context
                    .insert("leader_guidance".to_string(), guidance.clone());
            }

            let engine = Arc::clone(&self.engine);
            let persona = persona.clone();
            let persona_name = persona.id.clone();
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                run_one_inner(&engine, &persona, persona_task, &cancel).await
            });
            handles.push((persona_name, handle));
        }

        let mut runs = Vec::with_capacity(handles.len());
        for (persona, handle) in handles {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(error) => runs.push(PersonaRun {
                    run_id: new_run_id(),
                    persona,
                    status: PersonaRunStatus::Failed,
                    result: None,
                    error: Some(ErrorRecord::new(ErrorKind::Internal, error.to_string())),
                    elapsed_ms: 0,
                }),
            }
        }
        runs
    }

    async fn run_one(
        &self,
        persona: &Persona,
        task: Task,
        cancel: &CancellationToken,
    ) -> PersonaRun {
        run_one_inner(&self.engine, persona, task, cancel).await
    }

    /// Execute a validated step graph in dependency order. Steps of one
    /// wave run concurrently; a step whose dependency failed is skipped
    /// with a synthetic failed run. `base_context` seeds every step.
    pub async fn run_workflow(
        &self,
        graph: &StepGraph,
        base_context: serde_json::Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun> {
        graph.validate()?;
        for step in &graph.steps {
            if self.registry.get(&step.persona).is_none() {
                return Err(crate::error::CollabError::UnknownPersona(step.persona.clone()).into());
            }
        }

        let started_at = chrono::Utc::now();
        let waves = graph.waves().expect("validated graph has waves");
        let mut step_runs: HashMap<String, PersonaRun> = HashMap::new();
        let mut skipped: Vec<String> = Vec::new();

        for wave in waves {
            let mut handles = Vec::new();

            for step in wave {
                if let Some(failed_dep) = step.depends_on.iter().find(|dep| {
                    step_runs
                        .get(*dep)
                        .is_none_or(|run| run.status != PersonaRunStatus::Completed)
                }) {
                    tracing::warn!(
                        step = step.name.as_str(),
                        dependency = failed_dep.as_str(),
                        "workflow step skipped"
                    );
                    step_runs.insert(step.name.clone(), workflow::skipped_run(step, failed_dep));
                    skipped.push(step.name.clone());
                    continue;
                }

                let persona = self
                    .registry
                    .get(&step.persona)
                    .cloned()
                    .expect("personas checked above");

                let mut task = Task::new(step.description.clone());
                task.id = format!("{}_{}", graph.id, step.name);
                for (key, value) in &base_context {
                    task.context.insert(key.clone(), value.clone());
                }
                if !step.parameters.is_empty() {
                    task.context
                        .insert("parameters".to_string(), Value::Object(step.parameters.clone()));
                }
                let deps: serde_json::Map<String, Value> = step
                    .depends_on
                    .iter()
                    .filter_map(|dep| {
                        step_runs
                            .get(dep)
                            .and_then(PersonaRun::payload)
                            .map(|payload| (dep.clone(), payload.clone()))
                    })
                    .collect();
                if !deps.is_empty() {
                    task.context
                        .insert("step_results".to_string(), Value::Object(deps));
                }

                let engine = Arc::clone(&self.engine);
                let cancel = cancel.clone();
                let step_name = step.name.clone();
                handles.push((
                    step_name,
                    tokio::spawn(async move {
                        run_one_inner(&engine, &persona, task, &cancel).await
                    }),
                ));
            }

            for (step_name, handle) in handles {
                let run = handle.await.unwrap_or_else(|error| PersonaRun {
                    run_id: new_run_id(),
                    persona: String::new(),
                    status: PersonaRunStatus::Failed,
                    result: None,
                    error: Some(ErrorRecord::new(ErrorKind::Internal, error.to_string())),
                    elapsed_ms: 0,
                });
                step_runs.insert(step_name, run);
            }
        }

        let status = workflow::fold_status(&step_runs, &skipped);
        Ok(WorkflowRun {
            workflow_id: graph.id.clone(),
            status,
            started_at,
            completed_at: Some(chrono::Utc::now()),
            step_runs,
            skipped,
        })
    }
}

fn new_run_id() -> String {
    format!("run_{}", Uuid::new_v4())
}

fn task_for_persona(task: &Task, persona: &Persona) -> Task {
    let mut persona_task = task.clone();
    persona_task.id = format!("{}_{}", task.id, persona.id);
    persona_task.hints.force_persona = Some(persona.id.clone());
    persona_task
}

async fn run_one_inner(
    engine: &DelegationEngine,
    persona: &Persona,
    task: Task,
    cancel: &CancellationToken,
) -> PersonaRun {
    let started = Instant::now();
    let run_id = new_run_id();

    if cancel.is_cancelled() {
        return PersonaRun {
            run_id,
            persona: persona.id.clone(),
            status: PersonaRunStatus::Cancelled,
            result: None,
            error: Some(ErrorRecord::new(ErrorKind::Timeout, "cancelled")),
            elapsed_ms: 0,
        };
    }

    let outcome = tokio::select! {
        () = cancel.cancelled() => None,
        outcome = engine.run(task, Some(persona), cancel) => Some(outcome),
    };
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        None => PersonaRun {
            run_id,
            persona: persona.id.clone(),
            status: PersonaRunStatus::Cancelled,
            result: None,
            error: Some(ErrorRecord::new(ErrorKind::Timeout, "cancelled")),
            elapsed_ms,
        },
        Some(Ok(result)) if result.is_ok() => PersonaRun {
            run_id,
            persona: persona.id.clone(),
            status: PersonaRunStatus::Completed,
            result: Some(result),
            error: None,
            elapsed_ms,
        },
        Some(Ok(result)) => {
            let error = result.errors.first().cloned();
            PersonaRun {
                run_id,
                persona: persona.id.clone(),
                status: PersonaRunStatus::Failed,
                result: Some(result),
                error,
                elapsed_ms,
            }
        }
        Some(Err(e)) => PersonaRun {
            run_id,
            persona: persona.id.clone(),
            status: PersonaRunStatus::Failed,
            result: None,
            error: Some(ErrorRecord::new(e.kind(), e.to_string())),
            elapsed_ms,
        },
    }
}
