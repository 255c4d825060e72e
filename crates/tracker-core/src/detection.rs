//! Token-detection hook notified when tracked transactions complete.
//!
//! A completed transaction may have moved tokens the wallet has never seen,
//! so balances for the affected accounts should be re-scanned.

use crate::engine::event_bus::EventBus;
use std::collections::BTreeMap;
use tracker_types::{Transaction, TrackerEvent};

/// Receives completed transactions. Fire-and-forget: the tracker neither waits
/// for nor inspects any outcome.
pub trait TokenDetectionHook: Send + Sync {
	fn detect(&self, transactions: &[Transaction]);
}

/// Requests a token scan by publishing [`TrackerEvent::TokenScanRequested`],
/// one event per chain.
pub struct EventBusTokenDetector {
	event_bus: EventBus,
}

impl EventBusTokenDetector {
	pub fn new(event_bus: EventBus) -> Self {
		Self { event_bus }
	}
}

impl TokenDetectionHook for EventBusTokenDetector {
	fn detect(&self, transactions: &[Transaction]) {
		let mut by_chain: BTreeMap<u64, Vec<_>> = BTreeMap::new();
		for transaction in transactions {
			by_chain
				.entry(transaction.chain_id)
				.or_default()
				.push(transaction.id.clone());
		}

		for (chain_id, transaction_ids) in by_chain {
			self.event_bus
				.publish(TrackerEvent::TokenScanRequested {
					chain_id,
					transaction_ids,
				})
				.ok();
		}
	}
}
