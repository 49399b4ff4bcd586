//! Generic workflow step graphs.
//!
//! A step graph names persona-attributed steps with dependencies between
//! them. The coordinator executes the graph in dependency order, running
//! independent steps of the same wave concurrently and threading each
//! step's payload into its dependents under `context.step_results`.
//! Template *content* lives upstream; this is only the runner.

use super::{PersonaRun, PersonaRunStatus};
use crate::error::{CollabError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use strum::Display;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub description: String,
    pub persona: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepGraph {
    pub id: String,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One workflow execution: per-step runs plus the overall verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub step_runs: HashMap<String, PersonaRun>,
    /// Step names that never ran because a dependency failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl WorkflowRun {
    pub fn step_payload(&self, step: &str) -> Option<&Value> {
        self.step_runs.get(step).and_then(PersonaRun::payload)
    }
}

impl StepGraph {
    /// Reject graphs with duplicate step names, unknown dependencies, or
    /// dependency cycles.
    pub fn validate(&self) -> Result<(), CollabError> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(CollabError::InvalidWorkflow(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(CollabError::InvalidWorkflow(format!(
                        "step {} depends on unknown step {dep}",
                        step.name
                    )));
                }
            }
        }

        // Kahn-style wave peeling doubles as cycle detection.
        if self.waves().is_none() {
            return Err(CollabError::InvalidWorkflow(format!(
                "dependency cycle in workflow {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Topological waves: each wave's steps depend only on earlier waves.
    /// `None` when the graph has a cycle.
    pub fn waves(&self) -> Option<Vec<Vec<&WorkflowStep>>> {
        let mut remaining: Vec<&WorkflowStep> = self.steps.iter().collect();
        let mut resolved: HashSet<&str> = HashSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&WorkflowStep>, Vec<&WorkflowStep>) =
                remaining.into_iter().partition(|step| {
                    step.depends_on
                        .iter()
                        .all(|dep| resolved.contains(dep.as_str()))
                });

            if ready.is_empty() {
                return None;
            }
            for step in &ready {
                resolved.insert(step.name.as_str());
            }
            waves.push(ready);
            remaining = blocked;
        }
        Some(waves)
    }
}

/// Fold a finished set of step runs into the overall workflow verdict.
pub(super) fn fold_status(step_runs: &HashMap<String, PersonaRun>, skipped: &[String]) -> WorkflowStatus {
    if step_runs
        .values()
        .any(|run| run.status == PersonaRunStatus::Cancelled)
    {
        return WorkflowStatus::Cancelled;
    }
    if !skipped.is_empty()
        || step_runs
            .values()
            .any(|run| run.status == PersonaRunStatus::Failed)
    {
        return WorkflowStatus::Failed;
    }
    WorkflowStatus::Completed
}

/// A synthetic run entry for a step whose dependency failed.
pub(super) fn skipped_run(step: &WorkflowStep, failed_dep: &str) -> PersonaRun {
    PersonaRun {
        run_id: format!("run_{}", uuid::Uuid::new_v4()),
        persona: step.persona.clone(),
        status: PersonaRunStatus::Failed,
        result: None,
        error: Some(crate::task::ErrorRecord::new(
            ErrorKind::Internal,
            format!("dependency {failed_dep} did not complete"),
        )),
        elapsed_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, persona: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            description: format!("do {name}"),
            persona: persona.to_string(),
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
            parameters: Map::new(),
        }
    }

    fn graph(steps: Vec<WorkflowStep>) -> StepGraph {
        StepGraph {
            id: "wf_test".to_string(),
            steps,
        }
    }

    #[test]
    fn waves_respect_dependencies() {
        let graph = graph(vec![
            step("requirements", "athena", &[]),
            step("architecture", "athena", &["requirements"]),
            step("security", "hestia", &["architecture"]),
            step("implementation", "artemis", &["architecture"]),
            step("review", "hestia", &["implementation", "security"]),
        ]);
        graph.validate().unwrap();

        let waves = graph.waves().unwrap();
        let names: Vec<Vec<&str>> = waves
            .iter()
            .map(|wave| wave.iter().map(|s| s.name.as_str()).collect())
            .collect();
        assert_eq!(names[0], ["requirements"]);
        assert_eq!(names[1], ["architecture"]);
        assert_eq!(names[2], ["security", "implementation"]);
        assert_eq!(names[3], ["review"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let graph = graph(vec![
            step("a", "athena", &["b"]),
            step("b", "artemis", &["a"]),
        ]);
        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let graph = graph(vec![step("a", "athena", &["ghost"])]);
        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let graph = graph(vec![step("a", "athena", &[]), step("a", "artemis", &[])]);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn fold_status_prefers_cancelled_over_failed() {
        let mut runs = HashMap::new();
        runs.insert(
            "a".to_string(),
            PersonaRun {
                run_id: "r1".into(),
                persona: "athena".into(),
                status: PersonaRunStatus::Cancelled,
                result: None,
                error: None,
                elapsed_ms: 0,
            },
        );
        assert_eq!(fold_status(&runs, &[]), WorkflowStatus::Cancelled);

        runs.get_mut("a").unwrap().status = PersonaRunStatus::Completed;
        assert_eq!(fold_status(&runs, &[]), WorkflowStatus::Completed);
        assert_eq!(
            fold_status(&runs, &["b".to_string()]),
            WorkflowStatus::Failed
        );
    }
}
