use super::frame::{ContextFrame, FrameType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Priority bands. CLI priorities 1-10 map onto this scale times ten.
pub mod priority {
    pub const CRITICAL: u8 = 100;
    pub const HIGH: u8 = 80;
    pub const NORMAL: u8 = 50;
    pub const LOW: u8 = 20;
    pub const BACKGROUND: u8 = 10;
}

/// Workflow states older than this are reaped on maintenance.
pub const WORKFLOW_MAX_AGE_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
    pub max_concurrent_requests: usize,
    pub max_session_duration_secs: u64,
    pub max_context_size_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            max_cpu_percent: 25.0,
            max_concurrent_requests: 10,
            max_session_duration_secs: 24 * 60 * 60,
            max_context_size_mb: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: String,
    pub user_id: String,
    pub priority: u8,
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Recycled through the pool on close instead of being dropped.
    #[serde(default = "default_true")]
    pub auto_recycle: bool,
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            session_id: format!("sess_{}", Uuid::new_v4()),
            user_id: user_id.into(),
            priority: priority::NORMAL,
            limits: ResourceLimits::default(),
            auto_recycle: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub requests_processed: u64,
    pub total_response_time_ms: u64,
    pub memory_peak_bytes: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            requests_processed: 0,
            total_response_time_ms: 0,
            memory_peak_bytes: 0,
            error_count: 0,
            created_at: now,
            last_activity: now,
        }
    }
}

impl SessionMetrics {
    pub fn avg_response_time_ms(&self) -> u64 {
        self.total_response_time_ms / self.requests_processed.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub state: Value,
    pub updated_at: DateTime<Utc>,
}

/// Filter for frame reads. Empty filter returns everything unexpired.
#[derive(Debug, Clone, Default)]
pub struct FrameFilter {
    pub frame_type: Option<FrameType>,
    pub persona: Option<String>,
    pub limit: Option<usize>,
}

/// Normative migration payload: what a session is, minus its in-flight
/// request set and the migration flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub config: SessionConfig,
    pub frames: Vec<ContextFrame>,
    pub shared_context: Map<String, Value>,
    pub persona_contexts: HashMap<String, Map<String, Value>>,
    pub workflow_states: HashMap<String, WorkflowState>,
    pub metrics: SessionMetrics,
    pub migration_timestamp: DateTime<Utc>,
}

/// Per-user stateful execution scope. All mutation happens behind the
/// orchestrator's per-session lock; nothing here suspends.
#[derive(Debug)]
pub struct Session {
    pub config: SessionConfig,
    frames: Vec<ContextFrame>,
    shared_context: Map<String, Value>,
    persona_contexts: HashMap<String, Map<String, Value>>,
    workflow_states: HashMap<String, WorkflowState>,
    active_requests: HashSet<String>,
    pub metrics: SessionMetrics,
    pub is_active: bool,
    pub is_migrating: bool,
    pub migration_target: Option<String>,
    /// Running estimate of the context footprint in bytes.
    context_bytes: usize,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            shared_context: Map::new(),
            persona_contexts: HashMap::new(),
            workflow_states: HashMap::new(),
            active_requests: HashSet::new(),
            metrics: SessionMetrics::default(),
            is_active: true,
            is_migrating: false,
            migration_target: None,
            context_bytes: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    // ── Frames ──────────────────────────────────────────────────────────

    /// Append a frame unless it would push the context past its size budget.
    pub fn add_frame(&mut self, frame: ContextFrame) -> bool {
        let budget = self.config.limits.max_context_size_mb as usize * 1024 * 1024;
        let incoming = frame.approx_bytes();
        if self.context_bytes + incoming > budget {
            tracing::warn!(
                session = self.id(),
                frame = frame.id.as_str(),
                "frame rejected: context size budget exceeded"
            );
            return false;
        }
        self.context_bytes += incoming;
        self.frames.push(frame);
        self.touch();
        true
    }

    /// Frames newest-first, never including expired ones.
    pub fn get_frames(&self, filter: &FrameFilter) -> Vec<ContextFrame> {
        let now = Utc::now();
        let mut frames: Vec<ContextFrame> = self
            .frames
            .iter()
            .filter(|frame| !frame.is_expired(now))
            .filter(|frame| {
                filter
                    .frame_type
                    .is_none_or(|wanted| frame.frame_type == wanted)
            })
            .filter(|frame| {
                filter
                    .persona
                    .as_deref()
                    .is_none_or(|wanted| frame.persona.as_deref() == Some(wanted))
            })
            .cloned()
            .collect();
        frames.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            frames.truncate(limit);
        }
        frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    // ── Contexts ────────────────────────────────────────────────────────

    pub fn set_shared(&mut self, key: impl Into<String>, value: Value) {
        self.shared_context.insert(key.into(), value);
        self.touch();
    }

    pub fn set_persona_context(
        &mut self,
        persona: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) {
        self.persona_contexts
            .entry(persona.into())
            .or_default()
            .insert(key.into(), value);
        self.touch();
    }

    /// Persona-specific context first, then the shared map.
    pub fn get_context(&self, key: &str, persona: Option<&str>) -> Option<&Value> {
        if let Some(persona) = persona
            && let Some(context) = self.persona_contexts.get(persona)
            && let Some(value) = context.get(key)
        {
            return Some(value);
        }
        self.shared_context.get(key)
    }

    // ── Workflows ───────────────────────────────────────────────────────

    pub fn update_workflow(&mut self, workflow_id: impl Into<String>, state: Value) {
        self.workflow_states.insert(
            workflow_id.into(),
            WorkflowState {
                state,
                updated_at: Utc::now(),
            },
        );
        self.touch();
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowState> {
        self.workflow_states.get(workflow_id)
    }

    // ── Requests ────────────────────────────────────────────────────────

    pub fn can_accept_request(&self) -> bool {
        self.is_active
            && !self.is_migrating
            && self.active_requests.len() < self.config.limits.max_concurrent_requests
            && self.within_context_budget()
    }

    fn within_context_budget(&self) -> bool {
        self.context_bytes <= self.config.limits.max_memory_mb as usize * 1024 * 1024
    }

    pub fn begin_request(&mut self, request_id: impl Into<String>) {
        self.active_requests.insert(request_id.into());
        self.touch();
    }

    pub fn end_request(&mut self, request_id: &str) {
        self.active_requests.remove(request_id);
    }

    pub fn active_request_count(&self) -> usize {
        self.active_requests.len()
    }

    pub fn record_completion(&mut self, duration_ms: u64, failed: bool) {
        self.metrics.requests_processed += 1;
        self.metrics.total_response_time_ms += duration_ms;
        if failed {
            self.metrics.error_count += 1;
        }
        let footprint = self.context_bytes as u64;
        if footprint > self.metrics.memory_peak_bytes {
            self.metrics.memory_peak_bytes = footprint;
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.metrics.last_activity = Utc::now();
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Drop expired frames and stale workflow states. Returns how many
    /// entries were removed.
    pub fn reap_expired(&mut self) -> usize {
        let now = Utc::now();
        let before = self.frames.len() + self.workflow_states.len();

        self.frames.retain(|frame| !frame.is_expired(now));
        self.context_bytes = self.frames.iter().map(ContextFrame::approx_bytes).sum();

        let cutoff = now - chrono::Duration::seconds(WORKFLOW_MAX_AGE_SECS);
        self.workflow_states
            .retain(|_, state| state.updated_at >= cutoff);

        before - (self.frames.len() + self.workflow_states.len())
    }

    pub fn is_expired(&self, now: DateTime<Utc>, idle_timeout_secs: u64) -> bool {
        let max_age = super::frame::clamped_seconds(self.config.limits.max_session_duration_secs);
        let idle = super::frame::clamped_seconds(idle_timeout_secs);
        now - self.metrics.created_at > max_age || now - self.metrics.last_activity > idle
    }

    // ── Migration / pooling ─────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            config: self.config.clone(),
            frames: self.frames.clone(),
            shared_context: self.shared_context.clone(),
            persona_contexts: self.persona_contexts.clone(),
            workflow_states: self.workflow_states.clone(),
            metrics: self.metrics.clone(),
            migration_timestamp: Utc::now(),
        }
    }

    pub fn restore(snapshot: SessionSnapshot) -> Self {
        let context_bytes = snapshot
            .frames
            .iter()
            .map(ContextFrame::approx_bytes)
            .sum();
        Self {
            config: snapshot.config,
            frames: snapshot.frames,
            shared_context: snapshot.shared_context,
            persona_contexts: snapshot.persona_contexts,
            workflow_states: snapshot.workflow_states,
            active_requests: HashSet::new(),
            metrics: snapshot.metrics,
            is_active: true,
            is_migrating: false,
            migration_target: None,
            context_bytes,
        }
    }

    /// Reset mutable state for reuse from the pool.
    pub fn reset(&mut self, config: SessionConfig) {
        self.config = config;
        self.frames.clear();
        self.shared_context.clear();
        self.persona_contexts.clear();
        self.workflow_states.clear();
        self.active_requests.clear();
        self.metrics = SessionMetrics::default();
        self.is_active = true;
        self.is_migrating = false;
        self.migration_target = None;
        self.context_bytes = 0;
    }
}
