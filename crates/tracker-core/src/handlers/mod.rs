//! Handlers that turn poll results into store updates.

pub mod reconcile;

pub use reconcile::{classify, FailureClass, ReconcileHandler, Reconciliation};
