//! Core tracking engine for pending wallet transactions.
//!
//! Locally submitted transactions enter the [`state::TransactionStore`] as
//! pending. A [`PendingTransactionTracker`] per chain picks them up from the
//! store's change feed, polls the node for each one through a
//! [`monitoring::PollScheduler`], and reconciles the answers back into the
//! store until every transaction is completed or dropped.

pub mod builder;
pub mod detection;
pub mod engine;
pub mod handlers;
pub mod monitoring;
pub mod state;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{BuilderError, TrackerBuilder, TrackerFactories};
pub use detection::{EventBusTokenDetector, TokenDetectionHook};
pub use engine::{event_bus::EventBus, EngineError, TrackerEngine};
pub use tracker::{PendingTransactionTracker, TrackerError, TrackerServices};
