//! Task classification.
//!
//! Pure and order-free: the same `(kind, description)` pair always yields the
//! same complexity. Rules apply in order — explicit kind map first, then a
//! weighted keyword scan over the description, then the mechanical default.

use crate::task::{Complexity, Task, TaskKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub complexity: Complexity,
    pub kind: TaskKind,
}

const STRATEGIC_KEYWORDS: &[&str] = &[
    "architecture",
    "design system",
    "roadmap",
    "long-term",
    "strategy",
    "planning",
    "scalability",
    "future-proof",
];

const CREATIVE_KEYWORDS: &[&str] = &[
    "create",
    "design",
    "invent",
    "novel",
    "innovative",
    "new approach",
    "from scratch",
    "original",
];

const REASONING_KEYWORDS: &[&str] = &[
    "why",
    "debug",
    "analyze",
    "understand",
    "explain",
    "investigate",
    "diagnose",
    "root cause",
    "figure out",
];

const ANALYTICAL_KEYWORDS: &[&str] = &[
    "find",
    "search",
    "compare",
    "measure",
    "count",
    "pattern",
    "trend",
    "statistics",
    "metrics",
];

/// Complexity for a kind in the closed set. `Other` kinds fall through to
/// the keyword scan.
fn kind_complexity(kind: &TaskKind) -> Option<Complexity> {
    use TaskKind::{
        AlgorithmDesign, ApiDesign, ArchitectureDesign, CodeGeneration, CodeReview, CopyFiles,
        DataGathering, DebugAnalysis, DeepAnalysis, Documentation, ErrorInvestigation, FactGathering,
        FileSearch, InitialAnalysis, ListFiles, LogAnalysis, MetricCollection, Other, PatternSearch,
        PerformanceAnalysis, Reasoning, Refactoring, RoadmapPlanning, RunCommand, SecurityAudit,
        SolutionDesign, SystemDesign, TestGeneration,
    };

    let complexity = match kind {
        FileSearch | CopyFiles | RunCommand | ListFiles | DataGathering => Complexity::Mechanical,
        PatternSearch | TestGeneration | Documentation | MetricCollection | LogAnalysis
        | InitialAnalysis | FactGathering => Complexity::Analytical,
        DebugAnalysis | ErrorInvestigation | CodeReview | PerformanceAnalysis | Reasoning
        | DeepAnalysis => Complexity::Reasoning,
        AlgorithmDesign | ApiDesign | CodeGeneration | Refactoring | SolutionDesign => {
            Complexity::Creative
        }
        ArchitectureDesign | RoadmapPlanning | SystemDesign | SecurityAudit => Complexity::Strategic,
        Other(_) => return None,
    };
    Some(complexity)
}

fn contains_any(description: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| description.contains(keyword))
}

/// Classify a task by explicit kind, then description keywords, then the
/// mechanical default.
pub fn classify(kind: Option<&TaskKind>, description: &str) -> Classification {
    if let Some(kind) = kind
        && let Some(complexity) = kind_complexity(kind)
    {
        return Classification {
            complexity,
            kind: kind.clone(),
        };
    }

    let lowered = description.to_lowercase();
    let complexity = if contains_any(&lowered, STRATEGIC_KEYWORDS) {
        Complexity::Strategic
    } else if contains_any(&lowered, CREATIVE_KEYWORDS) {
        Complexity::Creative
    } else if contains_any(&lowered, REASONING_KEYWORDS) {
        Complexity::Reasoning
    } else if contains_any(&lowered, ANALYTICAL_KEYWORDS) {
        Complexity::Analytical
    } else {
        Complexity::Mechanical
    };

    Classification {
        complexity,
        kind: kind
            .cloned()
            .unwrap_or_else(|| TaskKind::Other("unclassified".to_string())),
    }
}

/// Classify in place: fills `task.complexity` (and normalizes the kind) when
/// the caller has not already pinned a complexity.
pub fn classify_task(task: &mut Task) {
    if task.complexity.is_some() {
        return;
    }
    let classification = classify(task.kind.as_ref(), &task.description);
    task.complexity = Some(classification.complexity);
    if task.kind.is_none() {
        task.kind = Some(classification.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_kind_wins_over_keywords() {
        // Description screams strategic, but the kind map says mechanical.
        let c = classify(Some(&TaskKind::ListFiles), "plan the architecture roadmap");
        assert_eq!(c.complexity, Complexity::Mechanical);
        assert_eq!(c.kind, TaskKind::ListFiles);
    }

    #[test]
    fn kind_map_levels() {
        assert_eq!(
            classify(Some(&TaskKind::PatternSearch), "").complexity,
            Complexity::Analytical
        );
        assert_eq!(
            classify(Some(&TaskKind::DebugAnalysis), "").complexity,
            Complexity::Reasoning
        );
        assert_eq!(
            classify(Some(&TaskKind::CodeGeneration), "").complexity,
            Complexity::Creative
        );
        assert_eq!(
            classify(Some(&TaskKind::SecurityAudit), "").complexity,
            Complexity::Strategic
        );
    }

    #[test]
    fn keyword_scan_is_ordered_strategic_first() {
        // Contains both strategic and analytical indicators.
        let c = classify(None, "Find scalability bottlenecks");
        assert_eq!(c.complexity, Complexity::Strategic);
    }

    #[test]
    fn keyword_scan_matches_case_insensitively() {
        assert_eq!(
            classify(None, "WHY does the build fail?").complexity,
            Complexity::Reasoning
        );
        assert_eq!(
            classify(None, "Compare the two parsers").complexity,
            Complexity::Analytical
        );
        assert_eq!(
            classify(None, "Design a cache from scratch").complexity,
            Complexity::Creative
        );
    }

    #[test]
    fn defaults_to_mechanical() {
        let c = classify(None, "touch the marker file");
        assert_eq!(c.complexity, Complexity::Mechanical);
        assert_eq!(c.kind, TaskKind::Other("unclassified".to_string()));
    }

    #[test]
    fn unknown_kind_falls_through_to_keywords() {
        let c = classify(
            Some(&TaskKind::Other("mystery".into())),
            "investigate the root cause",
        );
        assert_eq!(c.complexity, Complexity::Reasoning);
        assert_eq!(c.kind, TaskKind::Other("mystery".into()));
    }

    #[test]
    fn classification_is_deterministic() {
        let first = classify(Some(&TaskKind::CodeReview), "review the diff");
        let second = classify(Some(&TaskKind::CodeReview), "review the diff");
        assert_eq!(first, second);
    }

    #[test]
    fn classify_task_respects_pinned_complexity() {
        let mut task = Task::new("design a new architecture");
        task.complexity = Some(Complexity::Mechanical);
        classify_task(&mut task);
        assert_eq!(task.complexity, Some(Complexity::Mechanical));

        let mut task = Task::new("design a new architecture");
        classify_task(&mut task);
        assert_eq!(task.complexity, Some(Complexity::Strategic));
    }
}
