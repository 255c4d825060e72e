//! Shared fixtures for tracker-core tests.

use crate::detection::TokenDetectionHook;
use crate::state::TransactionStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracker_node::{NodeError, NodeInterface, NodeService};
use tracker_storage::implementations::memory::MemoryStorage;
use tracker_storage::StorageService;
use tracker_types::{
	ConfigSchema, NewTransaction, NodeTransaction, Schema, Transaction, TransactionHash,
	TransactionId, ValidationError,
};

pub type Outcome = Result<Option<NodeTransaction>, NodeError>;

pub fn memory_store() -> Arc<TransactionStore> {
	let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
	Arc::new(TransactionStore::new(storage, 64))
}

pub fn hash(byte: u8) -> TransactionHash {
	TransactionHash(vec![byte; 32])
}

/// A pending transaction from a fixed sender.
pub fn pending_tx(chain_id: u64, nonce: u64, hash_byte: u8) -> Transaction {
	NewTransaction {
		hash: hash(hash_byte),
		chain_id,
		from: "0x00000000000000000000000000000000000000aa".to_string(),
		to: Some("0x00000000000000000000000000000000000000bb".to_string()),
		nonce,
		value: "1000".to_string(),
		gas_price: "1".to_string(),
	}
	.into()
}

pub fn mined(tx: &Transaction, block_number: u64) -> NodeTransaction {
	NodeTransaction {
		hash: tx.hash.clone(),
		block_number,
		from: Some(tx.from.clone()),
	}
}

struct EmptySchema;

impl ConfigSchema for EmptySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Node that answers from per-hash scripts, then with `Ok(None)`.
///
/// Counts calls and records the highest number of concurrent requests.
#[derive(Default)]
pub struct ScriptedNode {
	scripts: Mutex<HashMap<TransactionHash, VecDeque<Outcome>>>,
	delay: Duration,
	calls: Mutex<HashMap<TransactionHash, usize>>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl ScriptedNode {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Every request takes `delay` to answer.
	pub fn with_delay(delay: Duration) -> Arc<Self> {
		Arc::new(Self {
			delay,
			..Self::default()
		})
	}

	pub fn push(&self, hash: &TransactionHash, outcome: Outcome) {
		self.scripts
			.lock()
			.unwrap()
			.entry(hash.clone())
			.or_default()
			.push_back(outcome);
	}

	pub fn calls(&self, hash: &TransactionHash) -> usize {
		self.calls.lock().unwrap().get(hash).copied().unwrap_or(0)
	}

	pub fn total_calls(&self) -> usize {
		self.calls.lock().unwrap().values().sum()
	}

	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	/// Wraps the node in a service answering for `chain_ids`.
	pub fn service(self: &Arc<Self>, chain_ids: &[u64]) -> Arc<NodeService> {
		let providers = chain_ids
			.iter()
			.map(|chain_id| (*chain_id, self.clone() as Arc<dyn NodeInterface>))
			.collect();
		Arc::new(NodeService::new(providers))
	}
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

#[async_trait]
impl NodeInterface for ScriptedNode {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EmptySchema)
	}

	async fn transaction_by_hash(
		&self,
		hash: &TransactionHash,
		_chain_id: u64,
	) -> Result<Option<NodeTransaction>, NodeError> {
		*self.calls.lock().unwrap().entry(hash.clone()).or_default() += 1;
		let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		let _in_flight = InFlight(&self.in_flight);
		self.max_in_flight.fetch_max(current, Ordering::SeqCst);

		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}

		self.scripts
			.lock()
			.unwrap()
			.get_mut(hash)
			.and_then(|script| script.pop_front())
			.unwrap_or(Ok(None))
	}
}

/// Hook that remembers every batch it was handed.
#[derive(Default)]
pub struct RecordingHook {
	batches: Mutex<Vec<Vec<TransactionId>>>,
}

impl RecordingHook {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn batches(&self) -> Vec<Vec<TransactionId>> {
		self.batches.lock().unwrap().clone()
	}
}

impl TokenDetectionHook for RecordingHook {
	fn detect(&self, transactions: &[Transaction]) {
		self.batches
			.lock()
			.unwrap()
			.push(transactions.iter().map(|tx| tx.id.clone()).collect());
	}
}
