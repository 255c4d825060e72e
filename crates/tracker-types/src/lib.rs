//! Common types for the pending transaction tracker.
//!
//! This crate defines the data types shared by every tracker component so that
//! the store, the node client and the tracking engine agree on a single
//! representation of transactions, node records and events.

/// API types for HTTP endpoints.
pub mod api;
/// Event types published by the tracking engine.
pub mod events;
/// Network configuration types.
pub mod networks;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;
/// Transaction, node record and filter types.
pub mod transaction;
/// Formatting and time helpers.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use api::*;
pub use events::*;
pub use networks::{NetworkConfig, NetworksConfig};
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use transaction::*;
pub use utils::{current_timestamp, truncate_id, with_0x_prefix, without_0x_prefix};
pub use validation::*;
