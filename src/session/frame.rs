use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FrameType {
    Task,
    Result,
    Error,
    Conversation,
    Workflow,
    PersonaState,
    SessionMeta,
    Custom,
}

/// One entry in a session's context history. Frames are append-only; expiry
/// is the only thing that removes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFrame {
    pub id: String,
    pub frame_type: FrameType,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ContextFrame {
    pub fn new(frame_type: FrameType, content: Value) -> Self {
        Self {
            id: format!("frame_{}", Uuid::new_v4()),
            frame_type,
            content,
            persona: None,
            created_at: Utc::now(),
            ttl_secs: None,
            parent_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            Some(ttl) => {
                let expiry = self.created_at + clamped_seconds(ttl);
                now > expiry
            }
            None => false,
        }
    }

    /// Serialized-size estimate used against the session context budget.
    pub fn approx_bytes(&self) -> usize {
        self.content.to_string().len()
            + self.metadata.iter().map(|(k, v)| k.len() + v.to_string().len()).sum::<usize>()
            + 64
    }
}

/// `chrono::Duration::seconds` panics near `i64::MAX`; clamp to its bound.
pub(crate) fn clamped_seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs)
        .unwrap_or(i64::MAX / 1_000)
        .min(i64::MAX / 1_000);
    chrono::Duration::seconds(secs)
}
