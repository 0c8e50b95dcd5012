//! 主动跟进：空闲用户的三段式再联系

pub mod scheduler;
pub mod state;

pub use scheduler::{EngagementDelays, EngagementScheduler, IdleOutcome, IdleResponder};
pub use state::{fallback_for, idle_note, Claim, EngagementState, Stamp, TimerState, Trigger};
