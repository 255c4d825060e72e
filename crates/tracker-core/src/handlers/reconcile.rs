//! Reconciliation of poll outcomes into the transaction store.
//!
//! A node record for the transaction completes it. An absent record keeps the
//! poller going. Errors are classified: an explicit RPC error response is
//! structural and drops the transaction; an undecodable response drops it only
//! when a different transaction with the same sender and nonce has already
//! completed; anything that never produced a response is transient.

use crate::detection::TokenDetectionHook;
use crate::engine::event_bus::EventBus;
use crate::monitoring::PollOutcome;
use crate::state::{TransactionStateError, TransactionStore};
use std::sync::Arc;
use tracing::instrument;
use tracker_node::NodeError;
use tracker_types::{truncate_id, DropReason, NodeTransaction, Transaction, TrackerEvent};

/// How a node error bears on the transaction it was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
	/// The node rejected the transaction; stop tracking it.
	Structural,
	/// The response could not be interpreted; terminal only when superseded.
	Ambiguous,
	/// No usable response; try again on the next tick.
	Transient,
}

/// Maps a node error onto a failure class.
pub fn classify(error: &NodeError) -> FailureClass {
	match error {
		NodeError::Rpc { .. } => FailureClass::Structural,
		NodeError::Decode(_) => FailureClass::Ambiguous,
		NodeError::Connection(_)
		| NodeError::Request(_)
		| NodeError::NoProviderAvailable(_)
		| NodeError::Configuration(_) => FailureClass::Transient,
	}
}

/// The decision taken for one poll outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
	/// The transaction is in a block; it was marked completed.
	Complete(NodeTransaction),
	/// Nothing changed.
	KeepPolling,
	/// The transaction was removed from the store.
	Drop(DropReason),
}

impl Reconciliation {
	/// True if tracking for the transaction is over.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, Reconciliation::KeepPolling)
	}
}

/// Applies poll outcomes to the store, notifying the token-detection hook and
/// the event bus of terminal outcomes.
pub struct ReconcileHandler {
	store: Arc<TransactionStore>,
	detector: Arc<dyn TokenDetectionHook>,
	event_bus: EventBus,
}

impl ReconcileHandler {
	pub fn new(
		store: Arc<TransactionStore>,
		detector: Arc<dyn TokenDetectionHook>,
		event_bus: EventBus,
	) -> Self {
		Self {
			store,
			detector,
			event_bus,
		}
	}

	/// Decides and applies the consequence of one poll outcome.
	///
	/// Returns [`TransactionStateError::TransactionNotFound`] if the record
	/// vanished before it could be completed; the hook is not invoked then.
	#[instrument(skip_all, fields(tx_id = %truncate_id(transaction.id.as_str()), chain_id = transaction.chain_id))]
	pub async fn reconcile(
		&self,
		transaction: &Transaction,
		outcome: PollOutcome,
	) -> Result<Reconciliation, TransactionStateError> {
		let decision = self.decide(transaction, outcome).await?;

		match &decision {
			Reconciliation::Complete(record) => {
				let completed = self
					.store
					.mark_completed(&transaction.id, record)
					.await?;
				tracing::info!(block_number = record.block_number, "Completed");

				self.detector.detect(std::slice::from_ref(&completed));
				self.event_bus
					.publish(TrackerEvent::TransactionCompleted {
						tx_id: completed.id.clone(),
						chain_id: completed.chain_id,
						block_number: record.block_number,
					})
					.ok();
			},
			Reconciliation::Drop(reason) => {
				self.store
					.delete(std::slice::from_ref(transaction))
					.await?;
				tracing::warn!(%reason, "Dropped");

				self.event_bus
					.publish(TrackerEvent::TransactionDropped {
						tx_id: transaction.id.clone(),
						chain_id: transaction.chain_id,
						reason: *reason,
					})
					.ok();
			},
			Reconciliation::KeepPolling => {},
		}

		Ok(decision)
	}

	async fn decide(
		&self,
		transaction: &Transaction,
		outcome: PollOutcome,
	) -> Result<Reconciliation, TransactionStateError> {
		let error = match outcome {
			Ok(Some(record)) => return Ok(Reconciliation::Complete(record)),
			Ok(None) => {
				tracing::trace!("Not yet in a block");
				return Ok(Reconciliation::KeepPolling);
			},
			Err(error) => error,
		};

		match classify(&error) {
			FailureClass::Structural => {
				tracing::debug!(error = %error, "Node rejected transaction");
				Ok(Reconciliation::Drop(DropReason::Rejected))
			},
			FailureClass::Ambiguous => {
				if self.store.has_completed_with_nonce(transaction).await? {
					Ok(Reconciliation::Drop(DropReason::Superseded))
				} else {
					tracing::debug!(error = %error, "Unreadable response, will retry");
					Ok(Reconciliation::KeepPolling)
				}
			},
			FailureClass::Transient => {
				tracing::debug!(error = %error, "Poll failed, will retry");
				Ok(Reconciliation::KeepPolling)
			},
		}
	}
}
