pub mod frame;
pub mod pool;
pub mod session;

pub use frame::{ContextFrame, FrameType};
pub use pool::{PoolStats, SessionPool};
pub use session::{
    FrameFilter, ResourceLimits, Session, SessionConfig, SessionMetrics, SessionSnapshot,
    WorkflowState, priority,
};
