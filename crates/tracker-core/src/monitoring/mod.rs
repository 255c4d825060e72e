//! Timer-driven polling of the node for tracked transactions.

pub mod scheduler;

pub use scheduler::{PollOutcome, PollResult, PollScheduler, PollTarget, SchedulerState};
