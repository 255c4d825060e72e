//! Configuration module for the pending transaction tracker.
//!
//! Configuration is read from TOML. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`; these are substituted before
//! parsing, and the parsed configuration is validated as a whole.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracker_types::networks::deserialize_networks;
use tracker_types::NetworksConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Tracking engine settings.
	pub tracker: TrackerConfig,
	/// Networks to track, keyed by chain id.
	#[serde(deserialize_with = "deserialize_networks")]
	pub networks: NetworksConfig,
	/// Storage backend configuration.
	pub storage: StorageConfig,
	/// Node client configuration.
	pub node: NodeConfig,
	/// HTTP API configuration.
	pub api: Option<ApiConfig>,
}

/// Tracking engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
	/// Identifier for this tracker instance, used in logs.
	pub id: String,
	/// Delay between the end of one poll and the start of the next, per transaction.
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
	/// Maximum number of node requests in flight across all transactions.
	#[serde(default = "default_max_concurrent_polls")]
	pub max_concurrent_polls: usize,
	/// Capacity of the tracker event bus.
	#[serde(default = "default_event_buffer")]
	pub event_buffer: usize,
}

impl TrackerConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_seconds)
	}
}

fn default_poll_interval_seconds() -> u64 {
	4
}

fn default_max_concurrent_polls() -> usize {
	5
}

fn default_event_buffer() -> usize {
	1024
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for node clients.
///
/// Each implementation lists the `network_ids` it serves; together they must
/// cover every configured network exactly once.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of `VAR_NAME`, or with `default` for
/// `${VAR_NAME:-default}` when the variable is unset. Inputs over 1MB are rejected.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};

		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)))
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads and validates configuration from a file.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path.as_ref()).await?;
		content.parse()
	}

	/// Checks the whole configuration for consistency.
	///
	/// - tracker id is set and polling parameters are within bounds
	/// - at least one network, each with an RPC URL
	/// - the primary storage implementation exists
	/// - node implementations cover every network exactly once and reference
	///   no unknown networks
	fn validate(&self) -> Result<(), ConfigError> {
		if self.tracker.id.is_empty() {
			return Err(ConfigError::Validation("Tracker ID cannot be empty".into()));
		}
		if !(1..=3600).contains(&self.tracker.poll_interval_seconds) {
			return Err(ConfigError::Validation(
				"poll_interval_seconds must be between 1 and 3600".into(),
			));
		}
		if !(1..=100).contains(&self.tracker.max_concurrent_polls) {
			return Err(ConfigError::Validation(
				"max_concurrent_polls must be between 1 and 100".into(),
			));
		}
		if self.tracker.event_buffer == 0 {
			return Err(ConfigError::Validation(
				"event_buffer must be greater than 0".into(),
			));
		}

		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"Networks configuration cannot be empty".into(),
			));
		}
		for (chain_id, network) in &self.networks {
			if network.rpc_url.is_empty() {
				return Err(ConfigError::Validation(format!(
					"Network {} must have rpc_url",
					chain_id
				)));
			}
		}

		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		self.validate_node_coverage()
	}

	fn validate_node_coverage(&self) -> Result<(), ConfigError> {
		if self.node.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one node implementation required".into(),
			));
		}

		let mut coverage: HashMap<u64, &str> = HashMap::new();
		for (impl_name, impl_config) in &self.node.implementations {
			let network_ids = impl_config
				.get("network_ids")
				.and_then(|v| v.as_array())
				.ok_or_else(|| {
					ConfigError::Validation(format!(
						"Node implementation '{}' missing 'network_ids' field",
						impl_name
					))
				})?;

			for network_value in network_ids {
				let network_id = network_value
					.as_integer()
					.and_then(|id| u64::try_from(id).ok())
					.ok_or_else(|| {
						ConfigError::Validation(format!(
							"Invalid network_id in node implementation '{}'",
							impl_name
						))
					})?;

				if !self.networks.contains_key(&network_id) {
					return Err(ConfigError::Validation(format!(
						"Node implementation '{}' references network {} which doesn't exist in networks config",
						impl_name, network_id
					)));
				}
				if let Some(existing) = coverage.insert(network_id, impl_name) {
					return Err(ConfigError::Validation(format!(
						"Duplicate node coverage for network {}: '{}' and '{}'",
						network_id, existing, impl_name
					)));
				}
			}
		}

		let mut uncovered: Vec<u64> = self
			.networks
			.keys()
			.filter(|chain_id| !coverage.contains_key(chain_id))
			.copied()
			.collect();
		if !uncovered.is_empty() {
			uncovered.sort_unstable();
			return Err(ConfigError::Validation(format!(
				"Networks without a node implementation: {:?}",
				uncovered
			)));
		}

		Ok(())
	}
}

/// Parses configuration from a TOML string, resolving environment variables
/// and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
