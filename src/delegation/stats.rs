//! Delegation decision statistics.
//!
//! Counts how tasks were routed, grouped by executor target and complexity
//! level. Surfaced through `status` for operators watching the local/main
//! split drift.

use crate::task::Complexity;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Serialize)]
pub struct DelegationStatsSnapshot {
    pub total_decisions: u64,
    pub decompositions: u64,
    pub by_target: BTreeMap<String, u64>,
    pub by_complexity: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct DelegationStats {
    inner: Mutex<DelegationStatsSnapshot>,
}

impl DelegationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, target: &str, complexity: Option<Complexity>, decomposed: bool) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.total_decisions += 1;
        if decomposed {
            inner.decompositions += 1;
        }
        *inner.by_target.entry(target.to_string()).or_insert(0) += 1;
        if let Some(complexity) = complexity {
            *inner
                .by_complexity
                .entry(complexity.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> DelegationStatsSnapshot {
        self.inner.lock().expect("stats lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_by_target_and_level() {
        let stats = DelegationStats::new();
        stats.record("local", Some(Complexity::Mechanical), false);
        stats.record("local", Some(Complexity::Analytical), false);
        stats.record("main", Some(Complexity::Strategic), false);
        stats.record("hybrid", Some(Complexity::Strategic), true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_decisions, 4);
        assert_eq!(snapshot.decompositions, 1);
        assert_eq!(snapshot.by_target["local"], 2);
        assert_eq!(snapshot.by_target["hybrid"], 1);
        assert_eq!(snapshot.by_complexity["strategic"], 2);
    }

    #[test]
    fn snapshot_is_detached() {
        let stats = DelegationStats::new();
        stats.record("main", None, false);
        let snapshot = stats.snapshot();
        stats.record("main", None, false);
        assert_eq!(snapshot.total_decisions, 1);
        assert_eq!(stats.snapshot().total_decisions, 2);
    }
}
