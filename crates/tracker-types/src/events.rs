//! Event types for inter-component communication.
//!
//! The tracking engine publishes these on its event bus so that other parts of
//! the application (logging, balance scanners, the HTTP API) can react to
//! reconciliation outcomes without coupling to the tracker itself.

use crate::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events emitted by the pending transaction tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerEvent {
	/// A poll scheduler was created for a pending transaction.
	TrackingStarted { tx_id: TransactionId, chain_id: u64 },
	/// The node reported the transaction in a block and the local record was completed.
	TransactionCompleted {
		tx_id: TransactionId,
		chain_id: u64,
		block_number: u64,
	},
	/// The local record was removed and tracking stopped.
	TransactionDropped {
		tx_id: TransactionId,
		chain_id: u64,
		reason: DropReason,
	},
	/// Completed transactions should trigger a token balance re-scan.
	TokenScanRequested {
		chain_id: u64,
		transaction_ids: Vec<TransactionId>,
	},
}

/// Why a pending transaction was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
	/// The node answered with an RPC-level error for this transaction.
	Rejected,
	/// Another transaction with the same sender and nonce already completed.
	Superseded,
}

impl fmt::Display for DropReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DropReason::Rejected => f.write_str("rejected by node"),
			DropReason::Superseded => f.write_str("superseded by completed transaction"),
		}
	}
}
