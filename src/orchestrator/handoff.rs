//! Migration handoff store.
//!
//! A TTL-bounded shared store that carries a serialized session from the
//! source orchestrator to the target. The trait is the seam for a real
//! shared backend; the in-memory implementation serves single-host setups
//! and tests. Keys follow `migration:<session_id>:<target>`.

use crate::session::SessionSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Handoff entries not claimed within this window are dropped.
pub const HANDOFF_TTL: Duration = Duration::from_secs(300);

pub fn handoff_key(session_id: &str, target: &str) -> String {
    format!("migration:{session_id}:{target}")
}

#[async_trait]
pub trait HandoffStore: Send + Sync {
    async fn put(&self, key: &str, snapshot: SessionSnapshot, ttl: Duration);
    /// Fetch without consuming; expired entries read as absent.
    async fn get(&self, key: &str) -> Option<SessionSnapshot>;
    async fn remove(&self, key: &str);
}

struct Entry {
    snapshot: SessionSnapshot,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryHandoffStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryHandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("handoff lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl HandoffStore for InMemoryHandoffStore {
    async fn put(&self, key: &str, snapshot: SessionSnapshot, ttl: Duration) {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300));
        self.entries
            .lock()
            .expect("handoff lock poisoned")
            .insert(key.to_string(), Entry {
                snapshot,
                expires_at,
            });
    }

    async fn get(&self, key: &str) -> Option<SessionSnapshot> {
        let entries = self.entries.lock().expect("handoff lock poisoned");
        let entry = entries.get(key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.snapshot.clone())
    }

    async fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("handoff lock poisoned")
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionConfig};

    fn snapshot() -> SessionSnapshot {
        Session::new(SessionConfig::new("mover")).snapshot()
    }

    #[test]
    fn key_format_is_normative() {
        assert_eq!(handoff_key("sess_1", "east"), "migration:sess_1:east");
    }

    #[tokio::test]
    async fn put_get_remove_round_trip() {
        let store = InMemoryHandoffStore::new();
        let key = handoff_key("sess_1", "east");
        store.put(&key, snapshot(), HANDOFF_TTL).await;

        let fetched = store.get(&key).await.unwrap();
        assert_eq!(fetched.config.user_id, "mover");

        store.remove(&key).await;
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = InMemoryHandoffStore::new();
        let key = handoff_key("sess_2", "west");
        store.put(&key, snapshot(), Duration::ZERO).await;
        assert!(store.get(&key).await.is_none());
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn purge_keeps_live_entries() {
        let store = InMemoryHandoffStore::new();
        store
            .put(&handoff_key("live", "t"), snapshot(), HANDOFF_TTL)
            .await;
        store
            .put(&handoff_key("dead", "t"), snapshot(), Duration::ZERO)
            .await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get(&handoff_key("live", "t")).await.is_some());
    }
}
