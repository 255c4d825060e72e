//! Node query module for the pending transaction tracker.
//!
//! The tracker asks a remote node exactly one question: "what do you know
//! about the transaction with this hash?". This crate defines that contract,
//! the error taxonomy the tracker uses to classify failures, and a service
//! that routes each query to the provider configured for the chain.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracker_types::{
	ConfigSchema, ImplementationRegistry, NetworksConfig, NodeTransaction, TransactionHash,
};

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors returned by node queries.
///
/// Variants map onto the failure classes the tracker distinguishes: an
/// explicit error response from the node, a response that does not have the
/// expected shape, and failures that never produced a response at all.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
	/// The node answered with a JSON-RPC error object.
	#[error("Node returned error {code}: {message}")]
	Rpc { code: i64, message: String },
	/// The node answered but the payload could not be decoded.
	#[error("Unexpected response: {0}")]
	Decode(String),
	/// The transport failed before a response was received.
	#[error("Connection error: {0}")]
	Connection(String),
	/// The request could not be built or sent.
	#[error("Request error: {0}")]
	Request(String),
	/// No provider is configured for the chain.
	#[error("No provider available for chain {0}")]
	NoProviderAvailable(u64),
	/// Invalid provider configuration.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Interface every node client implementation provides.
///
/// Implementations must be safe to call concurrently for different hashes and
/// must not retry internally; the tracker's poll interval is the retry policy.
#[async_trait]
pub trait NodeInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Looks up a transaction by hash.
	///
	/// Returns `Ok(None)` while the node does not know the transaction or has
	/// not yet seen it included in a block.
	async fn transaction_by_hash(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<NodeTransaction>, NodeError>;
}

/// Type alias for node factory functions.
pub type NodeFactory =
	fn(&toml::Value, &NetworksConfig) -> Result<Box<dyn NodeInterface>, NodeError>;

/// Registry trait for node implementations.
pub trait NodeRegistry: ImplementationRegistry<Factory = NodeFactory> {}

/// Get all registered node implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, NodeFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}

/// Routes transaction lookups to the provider configured for each chain.
pub struct NodeService {
	providers: HashMap<u64, Arc<dyn NodeInterface>>,
}

impl NodeService {
	pub fn new(providers: HashMap<u64, Arc<dyn NodeInterface>>) -> Self {
		Self { providers }
	}

	/// Looks up a transaction on the given chain.
	pub async fn transaction_by_hash(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<Option<NodeTransaction>, NodeError> {
		let provider = self
			.providers
			.get(&chain_id)
			.ok_or(NodeError::NoProviderAvailable(chain_id))?;

		provider.transaction_by_hash(hash, chain_id).await
	}

	/// Returns true if a provider is configured for the chain.
	pub fn supports(&self, chain_id: u64) -> bool {
		self.providers.contains_key(&chain_id)
	}

	/// Chains with a configured provider, in ascending order.
	pub fn chain_ids(&self) -> Vec<u64> {
		let mut chain_ids: Vec<u64> = self.providers.keys().copied().collect();
		chain_ids.sort_unstable();
		chain_ids
	}
}
