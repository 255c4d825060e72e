//! Pending transaction tracker.
//!
//! One tracker watches one chain. All of its state lives in a single actor
//! task that owns the table of tracking entries, one poll scheduler per
//! pending transaction. Commands from the handle, poll results and changes
//! to the chain's pending set from the store's change feed are handled one
//! at a time, so there is never more than one entry per transaction id. An
//! entry is torn down once its transaction leaves the pending set, whatever
//! removed it.

use crate::detection::TokenDetectionHook;
use crate::engine::event_bus::EventBus;
use crate::handlers::ReconcileHandler;
use crate::monitoring::{PollResult, PollScheduler, PollTarget};
use crate::state::{ChangeFeed, FeedBatch, TransactionStateError, TransactionStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracker_node::NodeService;
use tracker_types::{
	truncate_id, Transaction, TransactionFilter, TransactionId, TransactionState, TrackerEvent,
};

/// Errors that can occur when talking to a tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
	#[error("Tracker for chain {0} is shut down")]
	Shutdown(u64),
}

/// Services shared by the trackers of every chain.
#[derive(Clone)]
pub struct TrackerServices {
	pub store: Arc<TransactionStore>,
	pub node: Arc<NodeService>,
	/// Bounds node requests in flight across all trackers.
	pub permits: Arc<Semaphore>,
	pub detector: Arc<dyn TokenDetectionHook>,
	pub event_bus: EventBus,
}

enum TrackerCommand {
	Start { reply: oneshot::Sender<()> },
	CancelAll,
	ResumeAll,
	Tracked { reply: oneshot::Sender<Vec<TransactionId>> },
	Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running tracker actor.
///
/// Dropping the handle aborts the actor, which stops every scheduler it owns.
pub struct PendingTransactionTracker {
	chain_id: u64,
	commands: mpsc::UnboundedSender<TrackerCommand>,
	task: JoinHandle<()>,
}

impl PendingTransactionTracker {
	/// Spawns the actor for `chain_id`. Nothing is polled until [`start`](Self::start).
	pub fn new(chain_id: u64, poll_interval: Duration, services: TrackerServices) -> Self {
		let (commands, command_rx) = mpsc::unbounded_channel();
		let (results, result_rx) = mpsc::unbounded_channel();

		let actor = TrackerActor {
			chain_id,
			poll_interval,
			reconciler: ReconcileHandler::new(
				services.store.clone(),
				services.detector.clone(),
				services.event_bus.clone(),
			),
			services,
			entries: HashMap::new(),
			results,
			next_generation: 0,
			suspended: false,
		};
		let span = tracing::info_span!("tracker", chain_id);
		let task = tokio::spawn(actor.run(command_rx, result_rx).instrument(span));

		Self {
			chain_id,
			commands,
			task,
		}
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	/// Subscribes to pending transactions for the chain and begins tracking
	/// them. Calling it again has no effect.
	pub async fn start(&self) -> Result<(), TrackerError> {
		let (reply, response) = oneshot::channel();
		self.send(TrackerCommand::Start { reply })?;
		response.await.map_err(|_| TrackerError::Shutdown(self.chain_id))
	}

	/// Suspends every scheduler, keeping the entries.
	///
	/// Idempotent; ignored once the tracker is shut down.
	pub fn cancel_all(&self) {
		self.send(TrackerCommand::CancelAll).ok();
	}

	/// Resumes every scheduler with an immediate poll.
	///
	/// Idempotent; ignored once the tracker is shut down.
	pub fn resume_all(&self) {
		self.send(TrackerCommand::ResumeAll).ok();
	}

	/// Ids of the transactions currently tracked, in ascending order.
	pub async fn tracked(&self) -> Result<Vec<TransactionId>, TrackerError> {
		let (reply, response) = oneshot::channel();
		self.send(TrackerCommand::Tracked { reply })?;
		response.await.map_err(|_| TrackerError::Shutdown(self.chain_id))
	}

	/// Stops every scheduler and ends the actor.
	///
	/// Once this returns no scheduler of this tracker polls again.
	pub async fn shutdown(&self) {
		let (reply, response) = oneshot::channel();
		if self.send(TrackerCommand::Shutdown { reply }).is_ok() {
			response.await.ok();
		}
	}

	fn send(&self, command: TrackerCommand) -> Result<(), TrackerError> {
		self.commands
			.send(command)
			.map_err(|_| TrackerError::Shutdown(self.chain_id))
	}
}

impl Drop for PendingTransactionTracker {
	fn drop(&mut self) {
		self.task.abort();
	}
}

struct TrackingEntry {
	transaction: Transaction,
	scheduler: PollScheduler,
}

struct TrackerActor {
	chain_id: u64,
	poll_interval: Duration,
	services: TrackerServices,
	reconciler: ReconcileHandler,
	entries: HashMap<TransactionId, TrackingEntry>,
	/// Cloned into every scheduler.
	results: mpsc::UnboundedSender<PollResult>,
	next_generation: u64,
	/// Set by `cancel_all`; new entries start suspended until `resume_all`.
	suspended: bool,
}

impl TrackerActor {
	async fn run(
		mut self,
		mut commands: mpsc::UnboundedReceiver<TrackerCommand>,
		mut results: mpsc::UnboundedReceiver<PollResult>,
	) {
		let mut feed: Option<ChangeFeed> = None;

		loop {
			// Commands first, so cancel_all applies before newly fed entries start
			tokio::select! {
				biased;
				command = commands.recv() => match command {
					Some(TrackerCommand::Start { reply }) => {
						if feed.is_none() {
							feed = Some(
								self.services
									.store
									.subscribe(TransactionFilter::pending(self.chain_id)),
							);
							tracing::info!("Tracker started");
						}
						reply.send(()).ok();
					},
					Some(TrackerCommand::CancelAll) => self.cancel_all(),
					Some(TrackerCommand::ResumeAll) => self.resume_all(),
					Some(TrackerCommand::Tracked { reply }) => {
						let mut ids: Vec<TransactionId> = self.entries.keys().cloned().collect();
						ids.sort();
						reply.send(ids).ok();
					},
					Some(TrackerCommand::Shutdown { reply }) => {
						self.teardown_all();
						reply.send(()).ok();
						break;
					},
					None => break,
				},
				Some(result) = results.recv() => self.handle(result).await,
				batch = next_batch(&mut feed) => match batch {
					Some(Ok(FeedBatch::Snapshot(transactions))) => self.sync(transactions),
					Some(Ok(FeedBatch::Added(transactions))) => self.track(transactions),
					Some(Ok(FeedBatch::Removed(ids))) => self.untrack(&ids),
					Some(Err(e)) => {
						tracing::warn!(error = %e, "Failed to load pending transactions");
					},
					None => {
						tracing::warn!("Transaction store closed its change feed");
						feed = None;
					},
				},
			}
		}

		self.teardown_all();
		tracing::info!("Tracker stopped");
	}

	/// Creates an entry for every transaction not tracked yet.
	fn track(&mut self, transactions: Vec<Transaction>) {
		for transaction in transactions {
			if transaction.state != TransactionState::Pending
				|| transaction.chain_id != self.chain_id
			{
				continue;
			}
			if self.entries.contains_key(&transaction.id) {
				tracing::trace!(tx_id = %truncate_id(transaction.id.as_str()), "Already tracked");
				continue;
			}

			self.next_generation += 1;
			let target = PollTarget {
				tx_id: transaction.id.clone(),
				hash: transaction.hash.clone(),
				chain_id: transaction.chain_id,
				generation: self.next_generation,
			};
			let mut scheduler = PollScheduler::new(
				target,
				self.poll_interval,
				self.services.node.clone(),
				self.services.permits.clone(),
				self.results.clone(),
			);
			if !self.suspended {
				scheduler.start();
			}

			tracing::info!(
				tx_id = %truncate_id(transaction.id.as_str()),
				nonce = transaction.nonce,
				suspended = self.suspended,
				"Tracking"
			);
			self.services
				.event_bus
				.publish(TrackerEvent::TrackingStarted {
					tx_id: transaction.id.clone(),
					chain_id: self.chain_id,
				})
				.ok();

			self.entries.insert(
				transaction.id.clone(),
				TrackingEntry {
					transaction,
					scheduler,
				},
			);
		}
	}

	/// Replaces the tracked set with a full snapshot of pending transactions.
	fn sync(&mut self, snapshot: Vec<Transaction>) {
		let pending: HashSet<&TransactionId> = snapshot.iter().map(|tx| &tx.id).collect();
		let stale: Vec<TransactionId> = self
			.entries
			.keys()
			.filter(|id| !pending.contains(id))
			.cloned()
			.collect();
		self.untrack(&stale);
		self.track(snapshot);
	}

	/// Tears down entries whose transactions left the pending set.
	fn untrack(&mut self, ids: &[TransactionId]) {
		for id in ids {
			if self.entries.contains_key(id) {
				tracing::debug!(tx_id = %truncate_id(id.as_str()), "No longer pending");
				self.teardown(id);
			}
		}
	}

	/// Applies one poll result, tearing the entry down on terminal outcomes.
	async fn handle(&mut self, result: PollResult) {
		let Some(entry) = self.entries.get(&result.tx_id) else {
			tracing::trace!(tx_id = %truncate_id(result.tx_id.as_str()), "Result for untracked transaction ignored");
			return;
		};
		if entry.scheduler.generation() != result.generation {
			return;
		}
		let transaction = entry.transaction.clone();

		let finished = match self
			.reconciler
			.reconcile(&transaction, result.outcome)
			.await
		{
			Ok(decision) => decision.is_terminal(),
			Err(
				e @ (TransactionStateError::TransactionNotFound(_)
				| TransactionStateError::InvalidTransition { .. }),
			) => {
				tracing::debug!(tx_id = %truncate_id(transaction.id.as_str()), error = %e, "No longer pending");
				true
			},
			Err(e) => {
				tracing::warn!(tx_id = %truncate_id(transaction.id.as_str()), error = %e, "Failed to apply poll result");
				false
			},
		};

		if finished {
			self.teardown(&transaction.id);
		}
	}

	fn teardown(&mut self, id: &TransactionId) {
		if let Some(mut entry) = self.entries.remove(id) {
			entry.scheduler.stop();
			tracing::debug!(tx_id = %truncate_id(id.as_str()), "Stopped tracking");
		}
	}

	fn teardown_all(&mut self) {
		for (_, mut entry) in self.entries.drain() {
			entry.scheduler.stop();
		}
	}

	fn cancel_all(&mut self) {
		self.suspended = true;
		for entry in self.entries.values_mut() {
			entry.scheduler.cancel();
		}
		tracing::debug!(entries = self.entries.len(), "Suspended polling");
	}

	fn resume_all(&mut self) {
		self.suspended = false;
		for entry in self.entries.values_mut() {
			// Entries created while suspended were never started
			entry.scheduler.start();
			entry.scheduler.resume();
		}
		tracing::debug!(entries = self.entries.len(), "Resumed polling");
	}
}

async fn next_batch(
	feed: &mut Option<ChangeFeed>,
) -> Option<Result<FeedBatch, TransactionStateError>> {
	match feed {
		Some(feed) => feed.next_batch().await,
		None => std::future::pending().await,
	}
}
