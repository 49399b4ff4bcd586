//! Global resource monitor.
//!
//! Samples process-host memory and CPU through sysinfo and gates session
//! admission. Running work is never killed on its account; it only refuses
//! new admissions. Snapshot-returning API only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use sysinfo::System;

/// Admission is refused above these defaults (configurable).
pub const DEFAULT_MAX_MEMORY_PERCENT: f64 = 80.0;
pub const DEFAULT_MAX_CPU_PERCENT: f64 = 75.0;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    pub sampled_at: DateTime<Utc>,
}

pub struct GlobalResourceMonitor {
    max_memory_percent: f64,
    max_cpu_percent: f64,
    inner: Mutex<MonitorInner>,
}

struct MonitorInner {
    system: System,
    last: Option<ResourceSnapshot>,
    /// Test override: fixed values instead of live sampling.
    forced: Option<(f64, f64)>,
}

impl GlobalResourceMonitor {
    pub fn new(max_memory_percent: f64, max_cpu_percent: f64) -> Self {
        Self {
            max_memory_percent,
            max_cpu_percent,
            inner: Mutex::new(MonitorInner {
                system: System::new(),
                last: None,
                forced: None,
            }),
        }
    }

    /// Sample memory and CPU and cache the snapshot.
    pub fn refresh(&self) -> ResourceSnapshot {
        let mut inner = self.inner.lock().expect("monitor lock poisoned");

        let snapshot = if let Some((memory, cpu)) = inner.forced {
            ResourceSnapshot {
                memory_percent: memory,
                cpu_percent: cpu,
                total_memory_bytes: 0,
                used_memory_bytes: 0,
                sampled_at: Utc::now(),
            }
        } else {
            inner.system.refresh_memory();
            inner.system.refresh_cpu();
            let total = inner.system.total_memory();
            let used = inner.system.used_memory();
            #[allow(clippy::cast_precision_loss)]
            let memory_percent = if total == 0 {
                0.0
            } else {
                used as f64 / total as f64 * 100.0
            };
            ResourceSnapshot {
                memory_percent,
                cpu_percent: f64::from(inner.system.global_cpu_info().cpu_usage()),
                total_memory_bytes: total,
                used_memory_bytes: used,
                sampled_at: Utc::now(),
            }
        };

        inner.last = Some(snapshot.clone());
        snapshot
    }

    /// Last cached snapshot, refreshing if none was taken yet.
    pub fn snapshot(&self) -> ResourceSnapshot {
        {
            let inner = self.inner.lock().expect("monitor lock poisoned");
            if let Some(last) = &inner.last {
                return last.clone();
            }
        }
        self.refresh()
    }

    /// Admission gate: below both thresholds.
    pub fn can_admit(&self) -> bool {
        let snapshot = self.refresh();
        snapshot.memory_percent < self.max_memory_percent
            && snapshot.cpu_percent < self.max_cpu_percent
    }

    /// Test hook: pin the sampled values.
    #[doc(hidden)]
    pub fn force_usage(&self, memory_percent: f64, cpu_percent: f64) {
        let mut inner = self.inner.lock().expect("monitor lock poisoned");
        inner.forced = Some((memory_percent, cpu_percent));
        inner.last = None;
    }
}

impl Default for GlobalResourceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_PERCENT, DEFAULT_MAX_CPU_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_sampling_produces_sane_numbers() {
        let monitor = GlobalResourceMonitor::default();
        let snapshot = monitor.refresh();
        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
        assert!(snapshot.cpu_percent >= 0.0);
    }

    #[test]
    fn admission_refused_above_memory_threshold() {
        let monitor = GlobalResourceMonitor::default();
        monitor.force_usage(85.0, 10.0);
        assert!(!monitor.can_admit());
        monitor.force_usage(50.0, 10.0);
        assert!(monitor.can_admit());
    }

    #[test]
    fn admission_refused_above_cpu_threshold() {
        let monitor = GlobalResourceMonitor::default();
        monitor.force_usage(10.0, 90.0);
        assert!(!monitor.can_admit());
    }

    #[test]
    fn snapshot_reuses_cache_until_refresh() {
        let monitor = GlobalResourceMonitor::default();
        monitor.force_usage(42.0, 7.0);
        let first = monitor.refresh();
        let cached = monitor.snapshot();
        assert_eq!(first.sampled_at, cached.sampled_at);
    }
}
