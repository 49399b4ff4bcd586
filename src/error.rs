use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

// ─── Caller-visible error taxonomy ───────────────────────────────────────────

/// Wire-visible error kinds attached to execution results and surfaced by the
/// CLI. Every cross-component failure maps onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    TooLarge,
    Transport,
    Timeout,
    BackendUnavailable,
    NoExecutor,
    DeadlineExceeded,
    SessionNotFound,
    SessionBusy,
    SessionMigrating,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    /// Transport-layer kinds are retried by the router before the chain
    /// advances; everything else short-circuits.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }
}

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Trinitas.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum TrinitasError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Routing / backends ──────────────────────────────────────────────
    #[error("route: {0}")]
    Route(#[from] RouteError),

    // ── Collaboration ───────────────────────────────────────────────────
    #[error("collab: {0}")]
    Collab(#[from] CollabError),

    // ── Session / orchestrator ──────────────────────────────────────────
    #[error("session: {0}")]
    Session(#[from] SessionError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrinitasError {
    /// Collapse the hierarchy onto the wire taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Validation,
            Self::Route(e) => e.kind(),
            Self::Collab(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Other(_) => ErrorKind::Internal,
        }
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Routing / backend errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("task {task_id} exceeds {backend} envelope ({estimated} > {max} tokens)")]
    TooLarge {
        task_id: String,
        backend: String,
        estimated: u64,
        max: u64,
    },

    #[error("no eligible executor for task {task_id}: {reason}")]
    NoExecutor { task_id: String, reason: String },

    #[error("all eligible backends failed for task {task_id}: {attempts}")]
    BackendUnavailable { task_id: String, attempts: String },

    #[error("deadline exceeded for task {task_id}")]
    DeadlineExceeded { task_id: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

impl RouteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::NoExecutor { .. } => ErrorKind::NoExecutor,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::UnknownBackend(_) => ErrorKind::Validation,
        }
    }
}

// ─── Collaboration errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    #[error("unknown collaboration mode: {0}")]
    UnknownMode(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
}

impl CollabError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownPersona(_) | Self::UnknownMode(_) | Self::InvalidWorkflow(_) => {
                ErrorKind::Validation
            }
        }
    }
}

// ─── Session / orchestrator errors ──────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} cannot accept new requests")]
    Busy(String),

    #[error("session {0} is migrating")]
    Migrating(String),

    #[error("resource limits refused admission: {0}")]
    ResourceExhausted(String),

    #[error("migration of session {session_id} failed: {message}")]
    Migration { session_id: String, message: String },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::SessionNotFound,
            Self::Busy(_) => ErrorKind::SessionBusy,
            Self::Migrating(_) => ErrorKind::SessionMigrating,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Migration { .. } => ErrorKind::Internal,
        }
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, TrinitasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::BackendUnavailable).unwrap();
        assert_eq!(json, "\"BACKEND_UNAVAILABLE\"");
        let kind: ErrorKind = serde_json::from_str("\"TOO_LARGE\"").unwrap();
        assert_eq!(kind, ErrorKind::TooLarge);
    }

    #[test]
    fn retriable_kinds_are_transport_layer_only() {
        assert!(ErrorKind::Transport.is_retriable());
        assert!(ErrorKind::Timeout.is_retriable());
        assert!(!ErrorKind::TooLarge.is_retriable());
        assert!(!ErrorKind::BackendUnavailable.is_retriable());
        assert!(!ErrorKind::Validation.is_retriable());
    }

    #[test]
    fn route_error_maps_to_kind() {
        let err = TrinitasError::Route(RouteError::NoExecutor {
            task_id: "t1".into(),
            reason: "local pinned but unhealthy".into(),
        });
        assert_eq!(err.kind(), ErrorKind::NoExecutor);
        assert!(err.to_string().contains("t1"));
    }

    #[test]
    fn session_busy_displays_session_id() {
        let err = TrinitasError::Session(SessionError::Busy("sess_9".into()));
        assert_eq!(err.kind(), ErrorKind::SessionBusy);
        assert!(err.to_string().contains("sess_9"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("invariant violated");
        let err: TrinitasError = anyhow_err.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("invariant violated"));
    }
}
