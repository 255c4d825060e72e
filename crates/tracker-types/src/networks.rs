//! Network configuration types.
//!
//! Each tracked chain ("server" in wallet terms) is configured with the RPC
//! endpoint the node client should query.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Configuration for a single blockchain network.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// HTTP(S) RPC endpoint.
	pub rpc_url: String,
	/// Display name used in logs.
	#[serde(default)]
	pub name: Option<String>,
}

/// Chain id to network configuration.
pub type NetworksConfig = HashMap<u64, NetworkConfig>;

/// Deserializes networks keyed by chain id.
///
/// TOML table keys are always strings, so chain ids arrive as `"1"`, `"137"`
/// and are parsed into `u64` here.
pub fn deserialize_networks<'de, D>(deserializer: D) -> Result<NetworksConfig, D::Error>
where
	D: Deserializer<'de>,
{
	let string_map: HashMap<String, NetworkConfig> = HashMap::deserialize(deserializer)?;
	string_map
		.into_iter()
		.map(|(key, value)| {
			key.parse::<u64>()
				.map(|chain_id| (chain_id, value))
				.map_err(|e| {
					serde::de::Error::custom(format!("Invalid chain_id '{}': {}", key, e))
				})
		})
		.collect()
}
