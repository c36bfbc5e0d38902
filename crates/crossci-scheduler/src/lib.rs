//! Trigger evaluation and run scheduling for crossci.

pub mod concurrency;
pub mod scheduler;
pub mod triggers;

pub use concurrency::{Admission, ConcurrencyTracker};
pub use scheduler::{RunHandle, RunOutput, Scheduler};
pub use triggers::{SkipReason, TriggerDecision, TriggerMatcher, TriggerRule};
