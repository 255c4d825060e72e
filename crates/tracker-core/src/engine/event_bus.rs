//! Broadcast channel carrying tracker events to interested listeners.

use tokio::sync::broadcast;
use tracker_types::TrackerEvent;

/// Cloneable publisher/subscriber handle over a bounded broadcast channel.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest
/// events; publishing never blocks.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<TrackerEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Creates a receiver for events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event, returning the number of receivers reached.
	///
	/// Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		event: TrackerEvent,
	) -> Result<usize, broadcast::error::SendError<TrackerEvent>> {
		self.sender.send(event)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_publish_reaches_subscribers() {
		let bus = EventBus::new(4);
		let event = TrackerEvent::TrackingStarted {
			tx_id: "1-0xabc-0-0x01".into(),
			chain_id: 1,
		};
		assert!(bus.publish(event.clone()).is_err());

		let mut receiver = bus.subscribe();
		assert_eq!(bus.publish(event.clone()).unwrap(), 1);
		assert_eq!(receiver.recv().await.unwrap(), event);
	}
}
