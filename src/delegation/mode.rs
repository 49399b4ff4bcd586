//! Process-wide execution mode override.
//!
//! One of three legitimate global singletons (with the health registry and
//! the resource monitor). Consulted by the delegation engine before the
//! decision table; swapped atomically so readers never block.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ExecutionMode {
    /// All personas on the local model; local down means no executor.
    FullLocal,
    /// All personas on the main backend.
    ClaudeOnly,
    /// Core personas on main, support personas local with main fallback.
    Hybrid,
    /// The delegation decision table applies.
    #[default]
    Auto,
}

static MODE: LazyLock<ArcSwap<ExecutionMode>> =
    LazyLock::new(|| ArcSwap::from_pointee(ExecutionMode::default()));

/// Serializes tests that mutate the process-wide mode.
#[doc(hidden)]
pub static TEST_MODE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

pub fn current() -> ExecutionMode {
    **MODE.load()
}

pub fn set(mode: ExecutionMode) {
    MODE.store(Arc::new(mode));
    tracing::info!(mode = %mode, "execution mode changed");
}
