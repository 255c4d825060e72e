//! Startup and shutdown of the tracking engine.

use super::{EngineError, TrackerEngine};

impl TrackerEngine {
	/// Starts the tracker of every chain.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(
			tracker_id = %self.config.tracker.id,
			chains = ?self.chain_ids(),
			"Initializing tracking engine"
		);

		for tracker in self.trackers.values() {
			tracker
				.start()
				.await
				.map_err(|e| EngineError::Service(e.to_string()))?;
		}
		Ok(())
	}

	/// Stops every tracker. No poll fires after this returns.
	pub async fn shutdown(&self) {
		tracing::info!("Shutting down tracking engine");

		for tracker in self.trackers.values() {
			tracker.shutdown().await;
		}
	}
}
