//! Local transaction state for the tracker.
//!
//! The store persists transaction records through the storage service,
//! validates lifecycle transitions and publishes a change feed that the
//! tracker uses to follow the set of pending transactions.

pub mod transaction;

pub use transaction::{
	ChangeFeed, FeedBatch, StoreChange, TransactionStateError, TransactionStore,
};
