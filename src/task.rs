use crate::backend::BackendId;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;

// ─── Cognitive complexity ───────────────────────────────────────────────────

/// Cognitive complexity levels L1..L5. The numeric level drives both routing
/// affinity and the delegation decision table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Complexity {
    Mechanical,
    Analytical,
    Reasoning,
    Creative,
    Strategic,
}

impl Complexity {
    pub fn level(self) -> u8 {
        match self {
            Self::Mechanical => 1,
            Self::Analytical => 2,
            Self::Reasoning => 3,
            Self::Creative => 4,
            Self::Strategic => 5,
        }
    }

    /// Default routing affinity before the delegation table applies.
    pub fn affinity(self) -> BackendId {
        match self {
            Self::Mechanical | Self::Analytical => BackendId::Local,
            Self::Reasoning | Self::Creative | Self::Strategic => BackendId::Main,
        }
    }
}

// ─── Task kinds ─────────────────────────────────────────────────────────────

/// Closed set of task categories the classifier recognizes. Kinds outside the
/// set round-trip through `Other` and classify by keyword scan instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    // Mechanical (L1)
    FileSearch,
    CopyFiles,
    RunCommand,
    ListFiles,
    // Analytical (L2)
    PatternSearch,
    TestGeneration,
    Documentation,
    MetricCollection,
    LogAnalysis,
    // Reasoning (L3)
    DebugAnalysis,
    ErrorInvestigation,
    CodeReview,
    PerformanceAnalysis,
    // Creative (L4)
    AlgorithmDesign,
    ApiDesign,
    CodeGeneration,
    Refactoring,
    // Strategic (L5)
    ArchitectureDesign,
    RoadmapPlanning,
    SystemDesign,
    SecurityAudit,
    // Decomposition phases
    DataGathering,
    InitialAnalysis,
    DeepAnalysis,
    SolutionDesign,
    FactGathering,
    Reasoning,
    /// Unrecognized category; classified by description keywords.
    #[serde(untagged)]
    #[strum(default)]
    Other(String),
}

// ─── Task ───────────────────────────────────────────────────────────────────

/// Routing hints supplied by the caller. `force_executor` is authoritative
/// over every routing rule; `force_persona` resolves through the persona
/// registry before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_executor: Option<BackendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_persona: Option<String>,
}

/// A single unit of work, immutable per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,
    pub description: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub required_tools: BTreeSet<String>,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    pub estimated_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hints: TaskHints,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", Uuid::new_v4()),
            kind: None,
            description: description.into(),
            context: Map::new(),
            required_tools: BTreeSet::new(),
            priority: 5,
            estimated_tokens: 0,
            complexity: None,
            deadline: None,
            hints: TaskHints::default(),
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = tokens;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.required_tools.insert(tool.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Remaining time until the deadline, if one is set. `Some(ZERO)` means
    /// the deadline has already elapsed.
    pub fn remaining_deadline(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let deadline = self.deadline?;
        Some(
            (deadline - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO),
        )
    }
}

// ─── Execution results ──────────────────────────────────────────────────────

/// One recorded failure on a result. Results carry an ordered list of these
/// instead of raising; an empty list means success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of executing a task on a backend (or a synthesized hybrid run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    /// Backend id string, or `"hybrid"` for synthesized decomposition runs.
    pub executor: String,
    pub payload: Value,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub confidence: f64,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub cached: bool,
    /// Set when a follower phase of a decomposition failed but the plan
    /// still produced a usable synthesis.
    #[serde(default)]
    pub partial: bool,
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// A zero-confidence failure shell carrying a single error record.
    pub fn failed(
        task_id: impl Into<String>,
        executor: impl Into<String>,
        duration_ms: u64,
        error: ErrorRecord,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            executor: executor.into(),
            payload: Value::Null,
            tokens_used: 0,
            duration_ms,
            confidence: 0.0,
            errors: vec![error],
            cached: false,
            partial: false,
        }
    }

    /// All errors on this result are retriable transport-layer failures.
    pub fn only_retriable_errors(&self) -> bool {
        !self.errors.is_empty() && self.errors.iter().all(|e| e.kind.is_retriable())
    }
}

// ─── Confidence scoring ─────────────────────────────────────────────────────

/// Payloads at least this long (rendered) count as substantive.
pub const SUBSTANTIVE_PAYLOAD_LEN: usize = 100;

/// Confidence in a result: base 0.5, +0.4 for L1/L2, +0.2 for L3, +0.1 when
/// tools were invoked, +0.1 for a substantive payload. The clamp is applied
/// once, at the end.
pub fn score_confidence(
    complexity: Option<Complexity>,
    tools_invoked: bool,
    payload_len: usize,
) -> f64 {
    let mut confidence: f64 = 0.5;

    if let Some(complexity) = complexity {
        confidence += match complexity.level() {
            1 | 2 => 0.4,
            3 => 0.2,
            _ => 0.0,
        };
    }

    if tools_invoked {
        confidence += 0.1;
    }

    if payload_len >= SUBSTANTIVE_PAYLOAD_LEN {
        confidence += 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

/// Rendered payload length used for the substantive check: string payloads
/// count their text, everything else counts serialized `content` or the
/// whole value.
pub fn payload_text_len(payload: &Value) -> usize {
    match payload {
        Value::Null => 0,
        Value::String(s) => s.len(),
        Value::Object(map) => match map.get("content") {
            Some(Value::String(s)) => s.len(),
            _ => payload.to_string().len(),
        },
        other => other.to_string().len(),
    }
}

/// Whether a backend payload shows evidence of tool use.
pub fn payload_invoked_tools(payload: &Value) -> bool {
    payload
        .get("tool_calls")
        .and_then(Value::as_array)
        .is_some_and(|calls| !calls.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complexity_levels_are_ordered() {
        assert_eq!(Complexity::Mechanical.level(), 1);
        assert_eq!(Complexity::Strategic.level(), 5);
        assert!(Complexity::Mechanical < Complexity::Strategic);
    }

    #[test]
    fn kind_round_trips_snake_case() {
        let json = serde_json::to_string(&TaskKind::ArchitectureDesign).unwrap();
        assert_eq!(json, "\"architecture_design\"");
        let kind: TaskKind = "debug_analysis".parse().unwrap();
        assert_eq!(kind, TaskKind::DebugAnalysis);
    }

    #[test]
    fn unknown_kind_falls_back_to_other() {
        let kind: TaskKind = "interpretive_dance".parse().unwrap();
        assert_eq!(kind, TaskKind::Other("interpretive_dance".into()));
    }

    #[test]
    fn builder_clamps_priority() {
        let task = Task::new("x").with_priority(42);
        assert_eq!(task.priority, 10);
        let task = Task::new("x").with_priority(0);
        assert_eq!(task.priority, 1);
    }

    #[test]
    fn remaining_deadline_saturates_at_zero() {
        let now = Utc::now();
        let task = Task::new("late").with_deadline(now - chrono::Duration::seconds(10));
        assert_eq!(task.remaining_deadline(now), Some(std::time::Duration::ZERO));
        assert!(Task::new("open").remaining_deadline(now).is_none());
    }

    #[test]
    fn confidence_simple_task_with_tools_and_substance() {
        // L1 + tools + substantive: 0.5 + 0.4 + 0.1 + 0.1 = 1.1, clamped to 1.0
        let score = score_confidence(Some(Complexity::Mechanical), true, 200);
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_reasoning_without_tools() {
        let score = score_confidence(Some(Complexity::Reasoning), false, 10);
        assert!((score - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_strategic_base_only() {
        let score = score_confidence(Some(Complexity::Strategic), false, 0);
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_clamped_once_at_the_end() {
        // L2 + tools + substance transiently sums to 1.1.
        let score = score_confidence(Some(Complexity::Analytical), true, 500);
        assert!(score <= 1.0);
        // L1 + tools, thin payload: 0.5 + 0.4 + 0.1 = 1.0 exactly, no clamp hit.
        let score = score_confidence(Some(Complexity::Mechanical), true, 0);
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn payload_inspection_detects_tool_calls_and_length() {
        let payload = json!({
            "content": "short",
            "tool_calls": [{"id": "c1", "function": {"name": "read_file", "arguments": "{}"}}]
        });
        assert!(payload_invoked_tools(&payload));
        assert_eq!(payload_text_len(&payload), 5);
        assert!(!payload_invoked_tools(&json!({"content": "x", "tool_calls": []})));
        assert_eq!(payload_text_len(&Value::Null), 0);
    }

    #[test]
    fn failed_result_carries_single_error() {
        let result = ExecutionResult::failed(
            "t1",
            "local",
            12,
            ErrorRecord::new(ErrorKind::Transport, "connection refused"),
        );
        assert!(!result.is_ok());
        assert!(result.only_retriable_errors());
        assert_eq!(result.confidence, 0.0);
        assert!(result.payload.is_null());
    }
}
