//! Tracking engine that owns one pending transaction tracker per chain.
//!
//! The engine is what the service binary and the HTTP API talk to: it
//! registers newly submitted transactions, suspends and resumes polling, and
//! logs tracker events until shutdown.

pub mod event_bus;
pub mod lifecycle;

use crate::state::{TransactionStateError, TransactionStore};
use crate::tracker::PendingTransactionTracker;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracker_config::Config;
use tracker_types::{
	truncate_id, NewTransaction, TrackerEvent, TrackerStatusResponse, Transaction, TransactionId,
};

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Service error: {0}")]
	Service(String),
	#[error("No tracker for chain {0}")]
	UnsupportedChain(u64),
	#[error("Transaction already exists: {0}")]
	AlreadyExists(String),
	#[error("Transaction not found: {0}")]
	NotFound(String),
}

impl From<TransactionStateError> for EngineError {
	fn from(err: TransactionStateError) -> Self {
		match err {
			TransactionStateError::TransactionNotFound(id) => EngineError::NotFound(id),
			other => EngineError::Service(other.to_string()),
		}
	}
}

/// Owns the trackers for every configured chain.
pub struct TrackerEngine {
	pub(crate) config: Config,
	pub(crate) store: Arc<TransactionStore>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) trackers: BTreeMap<u64, PendingTransactionTracker>,
	suspended: AtomicBool,
}

impl TrackerEngine {
	pub fn new(
		config: Config,
		store: Arc<TransactionStore>,
		event_bus: event_bus::EventBus,
		trackers: BTreeMap<u64, PendingTransactionTracker>,
	) -> Self {
		Self {
			config,
			store,
			event_bus,
			trackers,
			suspended: AtomicBool::new(false),
		}
	}

	/// Runs until Ctrl+C, then shuts every tracker down.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "Failed to listen for shutdown signal");
			}
		})
		.await
	}

	/// Starts every tracker and logs tracker events until `shutdown` resolves.
	pub async fn run_until<F>(&self, shutdown: F) -> Result<(), EngineError>
	where
		F: Future<Output = ()>,
	{
		let mut events = self.event_bus.subscribe();
		self.initialize().await?;

		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				event = events.recv() => match event {
					Ok(event) => log_event(&event),
					Err(broadcast::error::RecvError::Lagged(missed)) => {
						tracing::warn!(missed, "Event log fell behind");
					},
					Err(broadcast::error::RecvError::Closed) => break,
				},
				_ = &mut shutdown => break,
			}
		}

		self.shutdown().await;
		Ok(())
	}

	/// Records a locally submitted transaction as pending.
	///
	/// The tracker for its chain picks it up from the store's change feed.
	pub async fn submit(&self, submitted: NewTransaction) -> Result<Transaction, EngineError> {
		if !self.trackers.contains_key(&submitted.chain_id) {
			return Err(EngineError::UnsupportedChain(submitted.chain_id));
		}

		let transaction = Transaction::from(submitted);
		if !self.store.insert_if_absent(transaction.clone()).await? {
			return Err(EngineError::AlreadyExists(transaction.id.to_string()));
		}

		tracing::info!(
			tx_id = %truncate_id(transaction.id.as_str()),
			chain_id = transaction.chain_id,
			"Submitted"
		);
		Ok(transaction)
	}

	/// Gets a transaction by id.
	pub async fn transaction(&self, id: &TransactionId) -> Result<Transaction, EngineError> {
		Ok(self.store.get(id).await?)
	}

	/// Suspends polling on every chain.
	pub fn suspend(&self) {
		self.suspended.store(true, Ordering::SeqCst);
		for tracker in self.trackers.values() {
			tracker.cancel_all();
		}
		tracing::info!("Suspended tracking");
	}

	/// Resumes polling on every chain.
	pub fn resume(&self) {
		self.suspended.store(false, Ordering::SeqCst);
		for tracker in self.trackers.values() {
			tracker.resume_all();
		}
		tracing::info!("Resumed tracking");
	}

	pub fn is_suspended(&self) -> bool {
		self.suspended.load(Ordering::SeqCst)
	}

	/// Transactions currently tracked, per chain.
	pub async fn status(&self) -> Result<TrackerStatusResponse, EngineError> {
		let mut tracked = BTreeMap::new();
		for (chain_id, tracker) in &self.trackers {
			let ids = tracker
				.tracked()
				.await
				.map_err(|e| EngineError::Service(e.to_string()))?;
			tracked.insert(*chain_id, ids);
		}

		Ok(TrackerStatusResponse {
			suspended: self.is_suspended(),
			tracked,
		})
	}

	/// Chains with a tracker, in ascending order.
	pub fn chain_ids(&self) -> Vec<u64> {
		self.trackers.keys().copied().collect()
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the transaction store.
	pub fn store(&self) -> &Arc<TransactionStore> {
		&self.store
	}
}

fn log_event(event: &TrackerEvent) {
	match event {
		TrackerEvent::TrackingStarted { tx_id, chain_id } => {
			tracing::debug!(tx_id = %truncate_id(tx_id.as_str()), chain_id, "Tracking started");
		},
		TrackerEvent::TransactionCompleted {
			tx_id,
			chain_id,
			block_number,
		} => {
			tracing::info!(tx_id = %truncate_id(tx_id.as_str()), chain_id, block_number, "Transaction completed");
		},
		TrackerEvent::TransactionDropped {
			tx_id,
			chain_id,
			reason,
		} => {
			tracing::info!(tx_id = %truncate_id(tx_id.as_str()), chain_id, %reason, "Transaction dropped");
		},
		TrackerEvent::TokenScanRequested {
			chain_id,
			transaction_ids,
		} => {
			tracing::debug!(chain_id, count = transaction_ids.len(), "Token scan requested");
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::detection::EventBusTokenDetector;
	use crate::test_utils::{hash, memory_store, mined, ScriptedNode};
	use crate::tracker::TrackerServices;
	use std::time::Duration;
	use tokio::sync::Semaphore;
	use tracker_types::TransactionState;

	const CONFIG: &str = r#"
[tracker]
id = "engine-test"

[networks.1]
rpc_url = "http://localhost:8545"

[storage]
primary = "memory"
[storage.implementations.memory]

[node]
[node.implementations.evm_alloy]
network_ids = [1]
"#;

	fn engine(node: &Arc<ScriptedNode>) -> TrackerEngine {
		let config: Config = CONFIG.parse().unwrap();
		let store = memory_store();
		let bus = event_bus::EventBus::new(64);
		let services = TrackerServices {
			store: store.clone(),
			node: node.service(&[1]),
			permits: Arc::new(Semaphore::new(5)),
			detector: Arc::new(EventBusTokenDetector::new(bus.clone())),
			event_bus: bus.clone(),
		};

		let mut trackers = BTreeMap::new();
		trackers.insert(
			1,
			PendingTransactionTracker::new(1, config.tracker.poll_interval(), services),
		);
		TrackerEngine::new(config, store, bus, trackers)
	}

	fn submission(chain_id: u64, nonce: u64, hash_byte: u8) -> NewTransaction {
		NewTransaction {
			hash: hash(hash_byte),
			chain_id,
			from: "0x00000000000000000000000000000000000000aa".to_string(),
			to: None,
			nonce,
			value: "0".to_string(),
			gas_price: "1".to_string(),
		}
	}

	#[tokio::test]
	async fn test_submit_rejects_unknown_chain_and_duplicates() {
		let engine = engine(&ScriptedNode::new());

		assert!(matches!(
			engine.submit(submission(5, 1, 0x01)).await,
			Err(EngineError::UnsupportedChain(5))
		));

		let tx = engine.submit(submission(1, 1, 0x01)).await.unwrap();
		assert_eq!(tx.state, TransactionState::Pending);
		assert!(matches!(
			engine.submit(submission(1, 1, 0x01)).await,
			Err(EngineError::AlreadyExists(_))
		));

		assert_eq!(engine.transaction(&tx.id).await.unwrap(), tx);
		assert!(matches!(
			engine.transaction(&"missing".into()).await,
			Err(EngineError::NotFound(_))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_until_tracks_submissions_and_shuts_down() {
		let node = ScriptedNode::new();
		let engine = Arc::new(engine(&node));
		let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

		let runner = {
			let engine = engine.clone();
			tokio::spawn(async move {
				engine
					.run_until(async {
						stopped.await.ok();
					})
					.await
			})
		};
		tokio::time::sleep(Duration::from_millis(1)).await;

		let submitted = submission(1, 4, 0x04);
		let expected = Transaction::from(submitted.clone());
		node.push(&expected.hash, Ok(Some(mined(&expected, 77))));
		let mut events = engine.event_bus().subscribe();

		let tx = engine.submit(submitted).await.unwrap();
		tokio::time::sleep(Duration::from_millis(1)).await;

		assert_eq!(
			engine.transaction(&tx.id).await.unwrap().state,
			TransactionState::Completed
		);
		let mut seen = Vec::new();
		while let Ok(event) = events.try_recv() {
			seen.push(event);
		}
		assert!(seen.contains(&TrackerEvent::TokenScanRequested {
			chain_id: 1,
			transaction_ids: vec![tx.id.clone()],
		}));

		stop.send(()).unwrap();
		runner.await.unwrap().unwrap();
		assert!(engine.status().await.is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn test_suspend_and_resume_report_status() {
		let node = ScriptedNode::new();
		let engine = engine(&node);
		engine.initialize().await.unwrap();

		engine.suspend();
		let tx = engine.submit(submission(1, 2, 0x02)).await.unwrap();
		tokio::time::sleep(Duration::from_millis(1)).await;

		let status = engine.status().await.unwrap();
		assert!(status.suspended);
		assert_eq!(status.tracked[&1], vec![tx.id.clone()]);

		assert_eq!(node.calls(&tx.hash), 0);

		engine.resume();
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert!(!engine.status().await.unwrap().suspended);
		assert_eq!(node.calls(&tx.hash), 1);
		assert_eq!(engine.chain_ids(), vec![1]);
	}
}
