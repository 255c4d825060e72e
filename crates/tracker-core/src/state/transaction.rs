//! Transaction store and its change feed.
//!
//! Records move through `Pending -> Completed` or `Pending -> Failed`; both
//! end states are terminal. Every mutation is serialized through a single
//! write lock and announced on a broadcast channel.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracker_storage::{StorageError, StorageService};
use tracker_types::{
	current_timestamp, truncate_id, NodeTransaction, StorageKey, Transaction, TransactionFilter,
	TransactionId, TransactionState,
};

/// Delay before a change feed retries a snapshot that failed to load.
const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors that can occur during transaction state management.
#[derive(Debug, Error)]
pub enum TransactionStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition {
		from: TransactionState,
		to: TransactionState,
	},
	#[error("Transaction not found: {0}")]
	TransactionNotFound(String),
}

/// A mutation applied to the store.
#[derive(Debug, Clone)]
pub enum StoreChange {
	Inserted(Transaction),
	Updated(Transaction),
	/// Records that were actually removed; never empty.
	Deleted(Vec<Transaction>),
}

/// Persists transactions and enforces valid state transitions.
pub struct TransactionStore {
	storage: Arc<StorageService>,
	changes: broadcast::Sender<StoreChange>,
	write_lock: Mutex<()>,
}

impl TransactionStore {
	/// Creates a store whose change feeds buffer up to `capacity` changes per
	/// subscriber before resynchronizing.
	pub fn new(storage: Arc<StorageService>, capacity: usize) -> Self {
		let (changes, _) = broadcast::channel(capacity);
		Self {
			storage,
			changes,
			write_lock: Mutex::new(()),
		}
	}

	fn map_error(id: &TransactionId, error: StorageError) -> TransactionStateError {
		match error {
			StorageError::NotFound => TransactionStateError::TransactionNotFound(id.to_string()),
			other => TransactionStateError::Storage(other.to_string()),
		}
	}

	fn announce(&self, change: StoreChange) {
		// No subscribers is fine
		self.changes.send(change).ok();
	}

	/// Stores a transaction, replacing any record with the same id.
	///
	/// Always announces an insertion, so re-submitting a pending transaction
	/// is visible to change feeds again.
	pub async fn insert(&self, transaction: Transaction) -> Result<(), TransactionStateError> {
		let _guard = self.write_lock.lock().await;
		self.storage
			.store(
				StorageKey::Transactions.as_str(),
				transaction.id.as_str(),
				&transaction,
			)
			.await
			.map_err(|e| Self::map_error(&transaction.id, e))?;
		self.announce(StoreChange::Inserted(transaction));
		Ok(())
	}

	/// Stores a transaction unless one with the same id already exists.
	///
	/// Returns false, leaving the existing record untouched, on conflict.
	pub async fn insert_if_absent(
		&self,
		transaction: Transaction,
	) -> Result<bool, TransactionStateError> {
		let _guard = self.write_lock.lock().await;
		let namespace = StorageKey::Transactions.as_str();
		let exists = self
			.storage
			.exists(namespace, transaction.id.as_str())
			.await
			.map_err(|e| Self::map_error(&transaction.id, e))?;
		if exists {
			return Ok(false);
		}

		self.storage
			.store(namespace, transaction.id.as_str(), &transaction)
			.await
			.map_err(|e| Self::map_error(&transaction.id, e))?;
		self.announce(StoreChange::Inserted(transaction));
		Ok(true)
	}

	/// Gets a transaction by id.
	pub async fn get(&self, id: &TransactionId) -> Result<Transaction, TransactionStateError> {
		self.storage
			.retrieve(StorageKey::Transactions.as_str(), id.as_str())
			.await
			.map_err(|e| Self::map_error(id, e))
	}

	/// Every stored transaction, ordered by id.
	pub async fn all(&self) -> Result<Vec<Transaction>, TransactionStateError> {
		self.query(TransactionFilter::default()).await
	}

	/// Transactions matching `filter`, ordered by id.
	pub async fn query(
		&self,
		filter: TransactionFilter,
	) -> Result<Vec<Transaction>, TransactionStateError> {
		query_storage(&self.storage, filter).await
	}

	/// Updates a transaction with a closure and persists it.
	pub async fn update_with<F>(
		&self,
		id: &TransactionId,
		updater: F,
	) -> Result<Transaction, TransactionStateError>
	where
		F: FnOnce(&mut Transaction),
	{
		self.modify(id, |transaction| {
			updater(transaction);
			Ok(())
		})
		.await
	}

	/// Transitions a transaction to a new state with validation.
	pub async fn transition_state(
		&self,
		id: &TransactionId,
		new_state: TransactionState,
	) -> Result<Transaction, TransactionStateError> {
		self.modify(id, |transaction| {
			Self::check_transition(transaction.state, new_state)?;
			transaction.state = new_state;
			Ok(())
		})
		.await
	}

	/// Completes a pending transaction with the block reported by the node.
	pub async fn mark_completed(
		&self,
		id: &TransactionId,
		record: &NodeTransaction,
	) -> Result<Transaction, TransactionStateError> {
		self.modify(id, |transaction| {
			Self::check_transition(transaction.state, TransactionState::Completed)?;
			transaction.state = TransactionState::Completed;
			transaction.block_number = Some(record.block_number);
			Ok(())
		})
		.await
	}

	/// Removes transactions, returning the ones that were actually present.
	///
	/// Deleting a record that is already gone is a no-op.
	pub async fn delete(
		&self,
		transactions: &[Transaction],
	) -> Result<Vec<Transaction>, TransactionStateError> {
		let _guard = self.write_lock.lock().await;
		let namespace = StorageKey::Transactions.as_str();

		let mut removed = Vec::new();
		for transaction in transactions {
			let id = &transaction.id;
			let exists = self
				.storage
				.exists(namespace, id.as_str())
				.await
				.map_err(|e| Self::map_error(id, e))?;
			if !exists {
				continue;
			}
			self.storage
				.remove(namespace, id.as_str())
				.await
				.map_err(|e| Self::map_error(id, e))?;
			removed.push(transaction.clone());
		}

		if !removed.is_empty() {
			tracing::debug!(count = removed.len(), "Deleted transactions");
			self.announce(StoreChange::Deleted(removed.clone()));
		}
		Ok(removed)
	}

	/// Returns true if a different, completed transaction occupies the same
	/// sender + nonce + chain slot as `transaction`.
	pub async fn has_completed_with_nonce(
		&self,
		transaction: &Transaction,
	) -> Result<bool, TransactionStateError> {
		let completed = self
			.query(TransactionFilter {
				chain_id: Some(transaction.chain_id),
				state: Some(TransactionState::Completed),
			})
			.await?;

		Ok(completed
			.iter()
			.any(|other| other.id != transaction.id && other.shares_nonce_with(transaction)))
	}

	/// Subscribes to transactions matching `filter`.
	///
	/// The feed is registered before the snapshot is read, so a transaction
	/// inserted concurrently may be delivered twice.
	pub fn subscribe(&self, filter: TransactionFilter) -> ChangeFeed {
		ChangeFeed {
			storage: self.storage.clone(),
			filter,
			receiver: self.changes.subscribe(),
			resync: true,
			retry_delay: None,
		}
	}

	async fn modify<F>(
		&self,
		id: &TransactionId,
		apply: F,
	) -> Result<Transaction, TransactionStateError>
	where
		F: FnOnce(&mut Transaction) -> Result<(), TransactionStateError>,
	{
		let _guard = self.write_lock.lock().await;
		let namespace = StorageKey::Transactions.as_str();

		let mut transaction: Transaction = self
			.storage
			.retrieve(namespace, id.as_str())
			.await
			.map_err(|e| Self::map_error(id, e))?;

		apply(&mut transaction)?;
		transaction.updated_at = current_timestamp();

		self.storage
			.update(namespace, id.as_str(), &transaction)
			.await
			.map_err(|e| Self::map_error(id, e))?;

		tracing::trace!(tx_id = %truncate_id(id.as_str()), state = %transaction.state, "Updated transaction");
		self.announce(StoreChange::Updated(transaction.clone()));
		Ok(transaction)
	}

	fn check_transition(
		from: TransactionState,
		to: TransactionState,
	) -> Result<(), TransactionStateError> {
		// Each state maps to its allowed next states
		static TRANSITIONS: Lazy<HashMap<TransactionState, HashSet<TransactionState>>> =
			Lazy::new(|| {
				let mut m = HashMap::new();
				m.insert(
					TransactionState::Pending,
					HashSet::from([TransactionState::Completed, TransactionState::Failed]),
				);
				m.insert(TransactionState::Completed, HashSet::new());
				m.insert(TransactionState::Failed, HashSet::new());
				m
			});

		if TRANSITIONS.get(&from).is_some_and(|next| next.contains(&to)) {
			Ok(())
		} else {
			Err(TransactionStateError::InvalidTransition { from, to })
		}
	}
}

async fn query_storage(
	storage: &StorageService,
	filter: TransactionFilter,
) -> Result<Vec<Transaction>, TransactionStateError> {
	let mut transactions: Vec<Transaction> = storage
		.retrieve_all(StorageKey::Transactions.as_str())
		.await
		.map_err(|e| TransactionStateError::Storage(e.to_string()))?;
	transactions.retain(|transaction| filter.matches(transaction));
	transactions.sort_by(|a, b| a.id.cmp(&b.id));
	Ok(transactions)
}

/// One delivery from a [`ChangeFeed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedBatch {
	/// Every transaction matching the filter when it was read. Anything not
	/// listed does not match.
	Snapshot(Vec<Transaction>),
	/// Transactions inserted or updated into the filter.
	Added(Vec<Transaction>),
	/// Transactions deleted, or written in a shape the filter rejects. May
	/// name transactions that never matched.
	Removed(Vec<TransactionId>),
}

/// Stream of changes to the set of transactions matching a filter.
///
/// Yields a full snapshot first, then one batch per store change. A feed
/// that falls behind the change buffer yields a fresh snapshot instead of
/// the missed changes.
pub struct ChangeFeed {
	storage: Arc<StorageService>,
	filter: TransactionFilter,
	receiver: broadcast::Receiver<StoreChange>,
	resync: bool,
	retry_delay: Option<Duration>,
}

impl ChangeFeed {
	/// Waits for the next batch.
	///
	/// Cancel safe: dropping the future loses nothing. Returns `None` once the
	/// store is gone.
	pub async fn next_batch(&mut self) -> Option<Result<FeedBatch, TransactionStateError>> {
		loop {
			if self.resync {
				if let Some(delay) = self.retry_delay {
					tokio::time::sleep(delay).await;
				}
				return match query_storage(&self.storage, self.filter).await {
					Ok(snapshot) => {
						self.resync = false;
						self.retry_delay = None;
						Some(Ok(FeedBatch::Snapshot(snapshot)))
					},
					Err(e) => {
						self.retry_delay = Some(SNAPSHOT_RETRY_DELAY);
						Some(Err(e))
					},
				};
			}

			match self.receiver.recv().await {
				Ok(change) => return Some(Ok(self.batch_for(change))),
				Err(broadcast::error::RecvError::Lagged(missed)) => {
					tracing::warn!(missed, "Change feed lagged, reloading snapshot");
					self.resync = true;
				},
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	fn batch_for(&self, change: StoreChange) -> FeedBatch {
		match change {
			StoreChange::Inserted(transaction) | StoreChange::Updated(transaction) => {
				if self.filter.matches(&transaction) {
					FeedBatch::Added(vec![transaction])
				} else {
					FeedBatch::Removed(vec![transaction.id])
				}
			},
			StoreChange::Deleted(transactions) => FeedBatch::Removed(
				transactions
					.into_iter()
					.map(|transaction| transaction.id)
					.collect(),
			),
		}
	}
}
