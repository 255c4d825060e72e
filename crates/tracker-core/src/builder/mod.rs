//! Builder pattern for constructing tracking engines.
//!
//! Storage and node client implementations are created through factory
//! functions keyed by implementation name, so the service binary decides
//! which implementations exist while the configuration decides which are used.

use crate::detection::{EventBusTokenDetector, TokenDetectionHook};
use crate::engine::{event_bus::EventBus, TrackerEngine};
use crate::state::TransactionStore;
use crate::tracker::{PendingTransactionTracker, TrackerServices};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracker_config::Config;
use tracker_node::{NodeError, NodeInterface, NodeService};
use tracker_storage::{StorageError, StorageInterface, StorageService};
use tracker_types::NetworksConfig;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct TrackerFactories<SF, NF> {
	pub storage_factories: HashMap<String, SF>,
	pub node_factories: HashMap<String, NF>,
}

/// Builder for constructing a [`TrackerEngine`] with pluggable implementations.
pub struct TrackerBuilder {
	config: Config,
	detector: Option<Arc<dyn TokenDetectionHook>>,
}

impl TrackerBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			detector: None,
		}
	}

	/// Replaces the default token-detection hook, which publishes scan
	/// requests on the event bus.
	pub fn with_detection_hook(mut self, detector: Arc<dyn TokenDetectionHook>) -> Self {
		self.detector = Some(detector);
		self
	}

	/// Builds the engine with one tracker per chain served by a node client.
	///
	/// Must be called within a Tokio runtime; trackers are spawned but not
	/// started.
	pub async fn build<SF, NF>(
		self,
		factories: TrackerFactories<SF, NF>,
	) -> Result<TrackerEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		NF: Fn(&toml::Value, &NetworksConfig) -> Result<Box<dyn NodeInterface>, NodeError>,
	{
		let primary_storage = &self.config.storage.primary;
		let storage_config = self
			.config
			.storage
			.implementations
			.get(primary_storage)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary storage '{}' has no configuration",
					primary_storage
				))
			})?;
		let storage_factory = factories
			.storage_factories
			.get(primary_storage)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!("storage implementation '{}'", primary_storage))
			})?;
		let storage_backend = storage_factory(storage_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %primary_storage,
				error = %e,
				"Failed to create storage implementation"
			);
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary_storage, e
			))
		})?;
		tracing::info!(component = "storage", implementation = %primary_storage, "Loaded");

		let event_bus = EventBus::new(self.config.tracker.event_buffer);
		let store = Arc::new(TransactionStore::new(
			Arc::new(StorageService::new(storage_backend)),
			self.config.tracker.event_buffer,
		));

		let node = Arc::new(self.build_node_service(&factories.node_factories)?);
		if node.chain_ids().is_empty() {
			return Err(BuilderError::Config(
				"No node implementations available".into(),
			));
		}

		let detector = self.detector.clone().unwrap_or_else(|| {
			Arc::new(EventBusTokenDetector::new(event_bus.clone())) as Arc<dyn TokenDetectionHook>
		});
		let services = TrackerServices {
			store: store.clone(),
			node: node.clone(),
			permits: Arc::new(Semaphore::new(self.config.tracker.max_concurrent_polls)),
			detector,
			event_bus: event_bus.clone(),
		};

		let poll_interval = self.config.tracker.poll_interval();
		let trackers: BTreeMap<u64, PendingTransactionTracker> = node
			.chain_ids()
			.into_iter()
			.map(|chain_id| {
				(
					chain_id,
					PendingTransactionTracker::new(chain_id, poll_interval, services.clone()),
				)
			})
			.collect();

		tracing::info!(
			chains = ?trackers.keys().collect::<Vec<_>>(),
			poll_interval_secs = poll_interval.as_secs(),
			max_concurrent_polls = self.config.tracker.max_concurrent_polls,
			"Built trackers"
		);

		Ok(TrackerEngine::new(self.config, store, event_bus, trackers))
	}

	fn build_node_service<NF>(
		&self,
		node_factories: &HashMap<String, NF>,
	) -> Result<NodeService, BuilderError>
	where
		NF: Fn(&toml::Value, &NetworksConfig) -> Result<Box<dyn NodeInterface>, NodeError>,
	{
		let mut providers: HashMap<u64, Arc<dyn NodeInterface>> = HashMap::new();

		for (name, config) in &self.config.node.implementations {
			let factory = node_factories.get(name).ok_or_else(|| {
				BuilderError::MissingComponent(format!("node implementation '{}'", name))
			})?;

			let implementation: Arc<dyn NodeInterface> =
				match factory(config, &self.config.networks) {
					Ok(implementation) => Arc::from(implementation),
					Err(e) => {
						tracing::error!(
							component = "node",
							implementation = %name,
							error = %e,
							"Failed to create node implementation"
						);
						return Err(BuilderError::Config(format!(
							"Failed to create node implementation '{}': {}",
							name, e
						)));
					},
				};

			let network_ids = config
				.get("network_ids")
				.and_then(|v| v.as_array())
				.ok_or_else(|| {
					BuilderError::Config(format!(
						"Node implementation '{}' missing 'network_ids'",
						name
					))
				})?;
			for network_id in network_ids.iter().filter_map(|v| v.as_integer()) {
				providers.insert(network_id as u64, implementation.clone());
			}

			tracing::info!(component = "node", implementation = %name, networks = network_ids.len(), "Loaded");
		}

		Ok(NodeService::new(providers))
	}
}
