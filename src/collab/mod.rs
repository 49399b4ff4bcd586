pub mod consensus;
pub mod coordinator;
pub mod workflow;

pub use consensus::{ConsensusOutcome, Verdict};
pub use coordinator::Coordinator;
pub use workflow::{StepGraph, WorkflowRun, WorkflowStatus, WorkflowStep};

use crate::task::{ErrorRecord, ExecutionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CollabMode {
    Sequential,
    Parallel,
    Hierarchical,
    Consensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// One persona's contribution to a collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRun {
    pub run_id: String,
    pub persona: String,
    pub status: PersonaRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub elapsed_ms: u64,
}

impl PersonaRun {
    pub fn payload(&self) -> Option<&Value> {
        self.result.as_ref().map(|r| &r.payload)
    }
}

/// Combined result of a multi-persona collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabOutcome {
    pub mode: CollabMode,
    pub task_id: String,
    pub runs: Vec<PersonaRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusOutcome>,
    pub all_succeeded: bool,
}

impl CollabOutcome {
    pub fn succeeded(&self) -> Vec<&PersonaRun> {
        self.runs
            .iter()
            .filter(|run| run.status == PersonaRunStatus::Completed)
            .collect()
    }
}
