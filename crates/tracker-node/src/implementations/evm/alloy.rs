//! Alloy-based EVM node client.
//!
//! Issues `eth_getTransactionByHash` against one HTTP provider per configured
//! network and translates Alloy's RPC error variants into [`NodeError`].

use crate::{NodeError, NodeInterface};
use alloy_json_rpc::RpcError;
use alloy_primitives::B256;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_transport::TransportErrorKind;
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracker_types::{
	truncate_id, ConfigSchema, Field, FieldType, NetworksConfig, NodeTransaction, Schema,
	TransactionHash,
};

/// Longest slice of an undecodable response body kept in error messages.
const MAX_ERROR_BODY: usize = 256;

/// Alloy-based EVM node implementation.
pub struct AlloyNode {
	/// Alloy providers for each supported network.
	providers: HashMap<u64, Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>>,
}

impl AlloyNode {
	/// Creates one HTTP provider for each of `network_ids`.
	pub fn new(network_ids: &[u64], networks: &NetworksConfig) -> Result<Self, NodeError> {
		if network_ids.is_empty() {
			return Err(NodeError::Configuration(
				"At least one network_id must be specified".to_string(),
			));
		}

		let mut providers = HashMap::new();
		for network_id in network_ids {
			let network = networks.get(network_id).ok_or_else(|| {
				NodeError::Configuration(format!(
					"Network {} not found in configuration",
					network_id
				))
			})?;

			let url = network.rpc_url.parse().map_err(|e| {
				NodeError::Configuration(format!(
					"Invalid RPC URL for network {}: {}",
					network_id, e
				))
			})?;

			let provider = ProviderBuilder::new().on_http(url);
			providers.insert(
				*network_id,
				Arc::new(provider) as Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
			);
		}

		Ok(Self { providers })
	}

	fn get_provider(
		&self,
		chain_id: u64,
	) -> Result<&Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>, NodeError> {
		self.providers
			.get(&chain_id)
			.ok_or(NodeError::NoProviderAvailable(chain_id))
	}
}

/// Translates an Alloy transport result error into the tracker's taxonomy.
///
/// - `ErrorResp`: the node produced a JSON-RPC error object.
/// - `DeserError`, `NullResp`: a response arrived but not in the expected shape.
/// - `Transport`: nothing usable came back from the endpoint.
/// - anything else happened while preparing the request locally.
pub(crate) fn map_rpc_error(error: RpcError<TransportErrorKind>) -> NodeError {
	match error {
		RpcError::ErrorResp(payload) => NodeError::Rpc {
			code: payload.code,
			message: payload.message.to_string(),
		},
		RpcError::NullResp => NodeError::Decode("null response".to_string()),
		RpcError::DeserError { err, text } => {
			let body: String = text.chars().take(MAX_ERROR_BODY).collect();
			NodeError::Decode(format!("{} (body: {})", err, body))
		},
		RpcError::Transport(kind) => NodeError::Connection(kind.to_string()),
		other => NodeError::Request(other.to_string()),
	}
}

/// Configuration schema for the Alloy node client.
pub struct AlloyNodeSchema;

impl ConfigSchema for AlloyNodeSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), tracker_types::ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"network_ids",
				FieldType::Array(Box::new(FieldType::Integer {
					min: Some(1),
					max: None,
				})),
			)
			.with_validator(|value| match value.as_array() {
				Some(ids) if ids.is_empty() => Err("network_ids cannot be empty".to_string()),
				_ => Ok(()),
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl NodeInterface for AlloyNode {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyNodeSchema)
	}

	async fn transaction_by_hash(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<NodeTransaction>, NodeError> {
		if hash.0.len() != 32 {
			return Err(NodeError::Request(format!(
				"Transaction hash must be 32 bytes, got {}",
				hash.0.len()
			)));
		}
		let tx_hash = B256::from_slice(&hash.0);
		let provider = self.get_provider(chain_id)?;

		let response = provider
			.get_transaction_by_hash(tx_hash)
			.await
			.map_err(map_rpc_error)?;

		let Some(transaction) = response else {
			tracing::trace!(tx_hash = %truncate_id(&hash.to_hex()), chain_id, "Unknown to node");
			return Ok(None);
		};

		// Mempool transactions come back without a block number
		Ok(transaction.block_number.map(|block_number| NodeTransaction {
			hash: hash.clone(),
			block_number,
			from: Some(transaction.from.to_string()),
		}))
	}
}

/// Factory function to create an Alloy node client from configuration.
///
/// Configuration parameters:
/// - `network_ids` (required): chains this client serves; each must exist in `networks`
pub fn create_node(
	config: &toml::Value,
	networks: &NetworksConfig,
) -> Result<Box<dyn NodeInterface>, NodeError> {
	AlloyNodeSchema
		.validate(config)
		.map_err(|e| NodeError::Configuration(format!("Invalid configuration: {}", e)))?;

	let network_ids = config
		.get("network_ids")
		.and_then(|v| v.as_array())
		.map(|arr| {
			arr.iter()
				.filter_map(|v| v.as_integer().map(|i| i as u64))
				.collect::<Vec<_>>()
		})
		.ok_or_else(|| NodeError::Configuration("network_ids is required".to_string()))?;

	Ok(Box::new(AlloyNode::new(&network_ids, networks)?))
}

/// Registry for the Alloy node implementation.
pub struct Registry;

impl tracker_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = crate::NodeFactory;

	fn factory() -> Self::Factory {
		create_node
	}
}

impl crate::NodeRegistry for Registry {}
