//! Factory registry for tracker implementations.
//!
//! Collects the factory functions every implementation crate exports so the
//! engine can be built from whatever implementations the configuration names.

use std::collections::HashMap;
use std::sync::OnceLock;
use tracker_config::Config;
use tracker_core::{TrackerBuilder, TrackerEngine, TrackerFactories};
use tracker_node::NodeFactory;
use tracker_storage::StorageFactory;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub node: HashMap<String, NodeFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			node: HashMap::new(),
		}
	}

	/// Register a storage implementation
	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	/// Register a node implementation
	pub fn register_node(&mut self, name: impl Into<String>, factory: NodeFactory) {
		self.node.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Initialize the global registry with all available implementations
pub fn initialize_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in tracker_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in tracker_node::get_all_implementations() {
			tracing::debug!("Registering node implementation: {}", name);
			registry.register_node(name, factory);
		}

		registry
	})
}

/// Get the global factory registry
pub fn get_registry() -> &'static FactoryRegistry {
	initialize_registry()
}

/// Picks the registered factory for every implementation the config names.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Build the tracking engine using the registry and config
pub async fn build_engine_from_config(
	config: Config,
) -> Result<TrackerEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let node_factories = build_factories!(registry, config.node.implementations, node, "node");

	let factories = TrackerFactories {
		storage_factories,
		node_factories,
	};

	Ok(TrackerBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;

	const CONFIG: &str = r#"
[tracker]
id = "registry-test"

[networks.1]
rpc_url = "http://localhost:8545"

[networks.10]
rpc_url = "http://localhost:9545"

[storage]
primary = "memory"
[storage.implementations.memory]

[node]
[node.implementations.evm_alloy]
network_ids = [1, 10]
"#;

	#[test]
	fn test_registry_contains_builtin_implementations() {
		let registry = get_registry();
		assert!(registry.storage.contains_key("memory"));
		assert!(registry.node.contains_key("evm_alloy"));
	}

	#[tokio::test]
	async fn test_builds_engine_for_configured_networks() {
		let config: Config = CONFIG.parse().unwrap();
		let engine = build_engine_from_config(config).await.unwrap();
		assert_eq!(engine.chain_ids(), vec![1, 10]);
		assert!(!engine.is_suspended());
	}

	#[tokio::test]
	async fn test_unknown_implementation_lists_available() {
		let config: Config = CONFIG
			.replace("[storage.implementations.memory]", "[storage.implementations.memory]\n[storage.implementations.redis]")
			.parse()
			.unwrap();
		let error = build_engine_from_config(config).await.err().unwrap();
		let message = error.to_string();
		assert!(message.contains("Unknown storage implementation 'redis'"));
		assert!(message.contains("memory"));
	}
}
