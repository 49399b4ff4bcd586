//! Task decomposition.
//!
//! A plan splits one oversized or pressured task into an ordered local phase
//! (gathering, organizing) and an ordered main phase (reasoning, synthesis),
//! with a leader flag deciding whose output wins the synthesis. Sub-tasks
//! inherit the parent's deadline and priority; each result feeds the next
//! sub-task's context under `prior_results`.

use crate::backend::BackendId;
use crate::task::{Complexity, Task, TaskKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leader {
    Local,
    Main,
}

impl Leader {
    pub fn backend(self) -> BackendId {
        match self {
            Self::Local => BackendId::Local,
            Self::Main => BackendId::Main,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionPlan {
    pub parent_id: String,
    pub local_phase: Vec<Task>,
    pub main_phase: Vec<Task>,
    pub leader: Leader,
    pub reason: String,
}

impl DecompositionPlan {
    pub fn sub_task_count(&self) -> usize {
        self.local_phase.len() + self.main_phase.len()
    }
}

fn sub_task(
    parent: &Task,
    suffix: &str,
    kind: TaskKind,
    complexity: Complexity,
    description: String,
    estimated_tokens: u64,
    tools: &[&str],
) -> Task {
    let mut task = Task::new(description)
        .with_kind(kind)
        .with_estimated_tokens(estimated_tokens)
        .with_priority(parent.priority);
    task.id = format!("{}_{suffix}", parent.id);
    task.complexity = Some(complexity);
    task.deadline = parent.deadline;
    for tool in tools {
        task.required_tools.insert((*tool).to_string());
    }
    task
}

/// Heavy + complex (L4/L5 above the main envelope's comfort point): local
/// gathers and organizes, main reasons and designs, main leads.
pub fn decompose_heavy_complex(parent: &Task) -> DecompositionPlan {
    let local_phase = vec![
        sub_task(
            parent,
            "local_1",
            TaskKind::DataGathering,
            Complexity::Mechanical,
            format!("Gather all relevant data for: {}", parent.description),
            parent.estimated_tokens / 2,
            &["file_operations", "bash"],
        ),
        sub_task(
            parent,
            "local_2",
            TaskKind::InitialAnalysis,
            Complexity::Analytical,
            "Process and organize collected data".to_string(),
            20_000,
            &["mcp_server"],
        ),
    ];

    let main_phase = vec![
        sub_task(
            parent,
            "main_1",
            TaskKind::DeepAnalysis,
            parent.complexity.unwrap_or(Complexity::Creative),
            format!("Analyze and understand: {}", parent.description),
            30_000,
            &[],
        ),
        sub_task(
            parent,
            "main_2",
            TaskKind::SolutionDesign,
            Complexity::Creative,
            "Design optimal solution based on analysis".to_string(),
            20_000,
            &[],
        ),
    ];

    DecompositionPlan {
        parent_id: parent.id.clone(),
        local_phase,
        main_phase,
        leader: Leader::Main,
        reason: format!(
            "heavy + complex task (level={}, tokens={})",
            parent.complexity.map_or(0, Complexity::level),
            parent.estimated_tokens
        ),
    }
}

/// Reasoning under main pressure: local collects facts first, main reasons
/// on them, local leads the data phase.
pub fn decompose_reasoning(parent: &Task) -> DecompositionPlan {
    let fact_tools: Vec<&str> = parent
        .required_tools
        .iter()
        .map(String::as_str)
        .collect();

    let local_phase = vec![sub_task(
        parent,
        "facts",
        TaskKind::FactGathering,
        Complexity::Analytical,
        format!("Collect facts and evidence for: {}", parent.description),
        parent.estimated_tokens * 6 / 10,
        &fact_tools,
    )];

    let main_phase = vec![sub_task(
        parent,
        "reasoning",
        TaskKind::Reasoning,
        Complexity::Reasoning,
        format!("Reason about: {} (based on gathered facts)", parent.description),
        parent.estimated_tokens * 4 / 10,
        &[],
    )];

    DecompositionPlan {
        parent_id: parent.id.clone(),
        local_phase,
        main_phase,
        leader: Leader::Local,
        reason: "reasoning task under main pressure".to_string(),
    }
}
