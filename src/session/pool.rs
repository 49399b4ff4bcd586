//! Session pool.
//!
//! Keeps a bounded set of idle sessions warm for reuse. Acquire resets a
//! recycled instance's mutable state; release returns it to the pool when
//! there is room. Idle entries older than an hour are discarded down to the
//! minimum on maintenance.

use super::session::{Session, SessionConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Idle sessions older than this are discarded down to `min_size`.
pub const IDLE_DISCARD_AGE_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub recycled_total: u64,
    pub allocated_total: u64,
}

struct IdleEntry {
    session: Session,
    parked_at: DateTime<Utc>,
}

struct PoolState {
    idle: VecDeque<IdleEntry>,
    recycled_total: u64,
    allocated_total: u64,
}

pub struct SessionPool {
    min_size: usize,
    max_size: usize,
    state: Mutex<PoolState>,
}

impl SessionPool {
    pub fn new(min_size: usize, max_size: usize) -> Self {
        let max_size = max_size.max(min_size);
        let pool = Self {
            min_size,
            max_size,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                recycled_total: 0,
                allocated_total: 0,
            }),
        };
        pool.top_up();
        pool
    }

    /// Reuse an idle session (resetting its mutable state) or allocate a
    /// fresh one.
    pub fn acquire(&self, config: SessionConfig) -> Session {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if let Some(entry) = state.idle.pop_front() {
            state.recycled_total += 1;
            let mut session = entry.session;
            session.reset(config);
            session
        } else {
            state.allocated_total += 1;
            Session::new(config)
        }
    }

    /// Park a closed session for reuse, unless the pool is already full.
    pub fn release(&self, mut session: Session) {
        session.reap_expired();
        session.is_active = false;

        let mut state = self.state.lock().expect("pool lock poisoned");
        if state.idle.len() < self.max_size {
            state.idle.push_back(IdleEntry {
                session,
                parked_at: Utc::now(),
            });
        }
        // Else: dropped on the floor; the pool is full.
    }

    /// Keep `idle >= min_size` by allocating placeholders.
    pub fn top_up(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        while state.idle.len() < self.min_size {
            let mut session = Session::new(SessionConfig::new("pool"));
            session.is_active = false;
            state.idle.push_back(IdleEntry {
                session,
                parked_at: Utc::now(),
            });
            state.allocated_total += 1;
        }
    }

    /// Discard idle sessions parked for over an hour, never going below
    /// `min_size`, then top back up.
    pub fn discard_stale(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(IDLE_DISCARD_AGE_SECS);
        let mut discarded = 0;
        {
            let mut state = self.state.lock().expect("pool lock poisoned");
            while state.idle.len() > self.min_size {
                match state.idle.front() {
                    Some(entry) if entry.parked_at < cutoff => {
                        state.idle.pop_front();
                        discarded += 1;
                    }
                    _ => break,
                }
            }
        }
        if discarded > 0 {
            tracing::debug!(discarded, "stale idle sessions discarded");
        }
        discarded
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().expect("pool lock poisoned");
        PoolStats {
            idle: state.idle.len(),
            min_size: self.min_size,
            max_size: self.max_size,
            recycled_total: state.recycled_total,
            allocated_total: state.allocated_total,
        }
    }
}
