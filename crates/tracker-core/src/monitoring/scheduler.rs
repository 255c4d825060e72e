//! Per-transaction poll scheduler.
//!
//! A scheduler repeatedly asks the node about one transaction hash and sends
//! every outcome to its tracker. It moves through
//! `Idle -> Running -> (Suspended <-> Running) -> Stopped`; a stopped scheduler
//! is never restarted.
//!
//! The first poll fires immediately on start and on resume. Each later poll
//! fires one interval after the previous one completed, so polls for the same
//! transaction never overlap. Requests from all schedulers draw permits from a
//! shared semaphore; polls waiting for a permit are queued.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracker_node::{NodeError, NodeService};
use tracker_types::{truncate_id, NodeTransaction, TransactionHash, TransactionId};

/// What one poll learned about a transaction.
pub type PollOutcome = Result<Option<NodeTransaction>, NodeError>;

/// A poll outcome addressed to the tracker.
#[derive(Debug)]
pub struct PollResult {
	pub tx_id: TransactionId,
	/// Generation of the scheduler that produced the result.
	pub generation: u64,
	pub outcome: PollOutcome,
}

/// Lifecycle state of a [`PollScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
	Idle,
	Running,
	Suspended,
	Stopped,
}

/// The transaction a scheduler polls for.
#[derive(Debug, Clone)]
pub struct PollTarget {
	pub tx_id: TransactionId,
	pub hash: TransactionHash,
	pub chain_id: u64,
	pub generation: u64,
}

/// Everything one poll loop needs; cloned into each spawned loop.
#[derive(Clone)]
struct PollContext {
	target: PollTarget,
	interval: Duration,
	node: Arc<NodeService>,
	permits: Arc<Semaphore>,
	/// Held for the duration of a request, across loops.
	in_flight: Arc<Mutex<()>>,
	results: mpsc::UnboundedSender<PollResult>,
}

pub struct PollScheduler {
	context: PollContext,
	state: SchedulerState,
	/// Dropping the sender ends the current loop at its next wait.
	stop_signal: Option<oneshot::Sender<()>>,
	/// The running loop plus any cancelled loop still finishing a request.
	tasks: Vec<JoinHandle<()>>,
}

impl PollScheduler {
	pub fn new(
		target: PollTarget,
		interval: Duration,
		node: Arc<NodeService>,
		permits: Arc<Semaphore>,
		results: mpsc::UnboundedSender<PollResult>,
	) -> Self {
		Self {
			context: PollContext {
				target,
				interval,
				node,
				permits,
				in_flight: Arc::new(Mutex::new(())),
				results,
			},
			state: SchedulerState::Idle,
			stop_signal: None,
			tasks: Vec::new(),
		}
	}

	pub fn state(&self) -> SchedulerState {
		self.state
	}

	pub fn generation(&self) -> u64 {
		self.context.target.generation
	}

	/// Starts polling. No-op unless idle.
	pub fn start(&mut self) {
		if self.state == SchedulerState::Idle {
			self.spawn_loop();
		}
	}

	/// Suspends polling. No-op unless running.
	///
	/// Ticks that have not started are abandoned; a request already sent to
	/// the node completes and its result is still delivered.
	pub fn cancel(&mut self) {
		if self.state == SchedulerState::Running {
			self.stop_signal = None;
			self.state = SchedulerState::Suspended;
		}
	}

	/// Resumes polling with an immediate poll. No-op unless suspended.
	pub fn resume(&mut self) {
		if self.state == SchedulerState::Suspended {
			self.spawn_loop();
		}
	}

	/// Stops the scheduler for good, abandoning any request in flight.
	pub fn stop(&mut self) {
		self.stop_signal = None;
		for task in self.tasks.drain(..) {
			task.abort();
		}
		self.state = SchedulerState::Stopped;
	}

	fn spawn_loop(&mut self) {
		let (stop_signal, stop) = oneshot::channel();
		let context = self.context.clone();
		let span = tracing::debug_span!(
			"poll",
			tx_id = %truncate_id(context.target.tx_id.as_str()),
			chain_id = context.target.chain_id
		);

		self.tasks.retain(|task| !task.is_finished());
		self.tasks
			.push(tokio::spawn(context.run(stop).instrument(span)));
		self.stop_signal = Some(stop_signal);
		self.state = SchedulerState::Running;
	}
}

impl Drop for PollScheduler {
	fn drop(&mut self) {
		self.stop();
	}
}

impl PollContext {
	async fn run(self, mut stop: oneshot::Receiver<()>) {
		loop {
			// A cancelled loop may still own the in-flight guard
			let in_flight = tokio::select! {
				biased;
				_ = &mut stop => return,
				guard = self.in_flight.clone().lock_owned() => guard,
			};

			let permit = tokio::select! {
				biased;
				_ = &mut stop => return,
				permit = self.permits.clone().acquire_owned() => match permit {
					Ok(permit) => permit,
					Err(_) => return,
				},
			};

			let outcome = self
				.node
				.transaction_by_hash(self.target.chain_id, &self.target.hash)
				.await;
			drop(permit);

			let result = PollResult {
				tx_id: self.target.tx_id.clone(),
				generation: self.target.generation,
				outcome,
			};
			if self.results.send(result).is_err() {
				tracing::trace!("Tracker gone, ending poll loop");
				return;
			}
			drop(in_flight);

			tokio::select! {
				biased;
				_ = &mut stop => return,
				_ = tokio::time::sleep(self.interval) => {},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{hash, mined, pending_tx, ScriptedNode};

	const INTERVAL: Duration = Duration::from_secs(4);

	fn scheduler(
		node: &Arc<ScriptedNode>,
		hash_byte: u8,
		permits: Arc<Semaphore>,
	) -> (PollScheduler, mpsc::UnboundedReceiver<PollResult>) {
		let (results, receiver) = mpsc::unbounded_channel();
		let tx = pending_tx(1, hash_byte as u64, hash_byte);
		let target = PollTarget {
			tx_id: tx.id,
			hash: tx.hash,
			chain_id: 1,
			generation: 7,
		};
		let scheduler = PollScheduler::new(target, INTERVAL, node.service(&[1]), permits, results);
		(scheduler, receiver)
	}

	async fn advance(duration: Duration) {
		tokio::time::sleep(duration).await;
	}

	fn drain(receiver: &mut mpsc::UnboundedReceiver<PollResult>) -> Vec<PollResult> {
		let mut results = Vec::new();
		while let Ok(result) = receiver.try_recv() {
			results.push(result);
		}
		results
	}

	#[tokio::test(start_paused = true)]
	async fn test_polls_immediately_then_on_interval() {
		let node = ScriptedNode::new();
		let tx = pending_tx(1, 1, 1);
		node.push(&tx.hash, Ok(None));
		node.push(&tx.hash, Ok(Some(mined(&tx, 9))));
		let (mut scheduler, mut results) = scheduler(&node, 1, Arc::new(Semaphore::new(5)));
		assert_eq!(scheduler.state(), SchedulerState::Idle);

		scheduler.start();
		advance(Duration::from_millis(1)).await;
		let first = drain(&mut results);
		assert_eq!(first.len(), 1);
		assert_eq!(first[0].generation, 7);
		assert!(matches!(first[0].outcome, Ok(None)));

		advance(INTERVAL - Duration::from_millis(2)).await;
		assert!(drain(&mut results).is_empty());

		advance(Duration::from_millis(2)).await;
		let second = drain(&mut results);
		assert_eq!(second.len(), 1);
		assert!(matches!(&second[0].outcome, Ok(Some(record)) if record.block_number == 9));
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_and_resume() {
		let node = ScriptedNode::new();
		let (mut scheduler, mut results) = scheduler(&node, 1, Arc::new(Semaphore::new(5)));

		scheduler.start();
		advance(Duration::from_millis(1)).await;
		assert_eq!(drain(&mut results).len(), 1);

		scheduler.cancel();
		scheduler.cancel();
		assert_eq!(scheduler.state(), SchedulerState::Suspended);
		advance(INTERVAL * 5).await;
		assert!(drain(&mut results).is_empty());
		assert_eq!(node.calls(&hash(1)), 1);

		scheduler.resume();
		assert_eq!(scheduler.state(), SchedulerState::Running);
		advance(Duration::from_millis(1)).await;
		assert_eq!(drain(&mut results).len(), 1);

		// Resuming a running scheduler changes nothing
		scheduler.resume();
		advance(Duration::from_millis(1)).await;
		assert!(drain(&mut results).is_empty());
		assert_eq!(node.calls(&hash(1)), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_lets_request_in_flight_finish() {
		let node = ScriptedNode::with_delay(Duration::from_secs(2));
		let (mut scheduler, mut results) = scheduler(&node, 1, Arc::new(Semaphore::new(5)));

		scheduler.start();
		advance(Duration::from_secs(1)).await;
		scheduler.cancel();

		advance(Duration::from_secs(2)).await;
		assert_eq!(drain(&mut results).len(), 1);

		advance(INTERVAL * 3).await;
		assert!(drain(&mut results).is_empty());
		assert_eq!(node.calls(&hash(1)), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_resume_never_overlaps_request_in_flight() {
		let node = ScriptedNode::with_delay(Duration::from_secs(2));
		let (mut scheduler, mut results) = scheduler(&node, 1, Arc::new(Semaphore::new(5)));

		scheduler.start();
		advance(Duration::from_secs(1)).await;
		scheduler.cancel();
		scheduler.resume();

		// The resumed loop waits for the outstanding request, then polls
		advance(Duration::from_secs(2)).await;
		assert_eq!(drain(&mut results).len(), 1);
		assert_eq!(node.calls(&hash(1)), 2);

		advance(Duration::from_secs(2)).await;
		assert_eq!(drain(&mut results).len(), 1);
		assert_eq!(node.max_in_flight(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_shared_permits_bound_concurrency() {
		let node = ScriptedNode::with_delay(Duration::from_secs(1));
		let permits = Arc::new(Semaphore::new(2));

		let mut schedulers = Vec::new();
		let mut receivers = Vec::new();
		for byte in 1..=6 {
			let (mut scheduler, receiver) = scheduler(&node, byte, permits.clone());
			scheduler.start();
			schedulers.push(scheduler);
			receivers.push(receiver);
		}

		advance(Duration::from_millis(3500)).await;
		assert_eq!(node.max_in_flight(), 2);
		assert_eq!(node.total_calls(), 6);
		for receiver in &mut receivers {
			assert_eq!(drain(receiver).len(), 1);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_stop_is_terminal() {
		let node = ScriptedNode::with_delay(Duration::from_secs(1));
		let (mut scheduler, mut results) = scheduler(&node, 1, Arc::new(Semaphore::new(5)));

		scheduler.start();
		advance(Duration::from_millis(500)).await;
		scheduler.stop();
		scheduler.stop();
		assert_eq!(scheduler.state(), SchedulerState::Stopped);

		scheduler.start();
		scheduler.resume();
		scheduler.cancel();
		assert_eq!(scheduler.state(), SchedulerState::Stopped);

		advance(INTERVAL * 3).await;
		assert!(drain(&mut results).is_empty());
		assert_eq!(node.calls(&hash(1)), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_drop_stops_polling() {
		let node = ScriptedNode::new();
		let (mut scheduler, mut results) = scheduler(&node, 1, Arc::new(Semaphore::new(5)));

		scheduler.start();
		advance(Duration::from_millis(1)).await;
		drop(scheduler);

		advance(INTERVAL * 3).await;
		assert_eq!(drain(&mut results).len(), 1);
		assert_eq!(node.calls(&hash(1)), 1);
	}
}
