pub mod decompose;
pub mod engine;
pub mod mode;
pub mod pressure;
pub mod stats;

pub use decompose::{DecompositionPlan, Leader};
pub use engine::{Decision, DelegationConfig, DelegationEngine, Routing};
pub use mode::ExecutionMode;
pub use pressure::PressureGauge;
pub use stats::{DelegationStats, DelegationStatsSnapshot};
