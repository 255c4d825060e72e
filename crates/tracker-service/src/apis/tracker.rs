//! Tracker status and the suspend/resume controls.

use super::api_error;
use tracker_core::TrackerEngine;
use tracker_types::{APIError, TrackerStatusResponse};

pub async fn status(engine: &TrackerEngine) -> Result<TrackerStatusResponse, APIError> {
	engine.status().await.map_err(api_error)
}

/// Suspends polling on every chain, as when the wallet goes to the background.
pub async fn suspend(engine: &TrackerEngine) -> Result<TrackerStatusResponse, APIError> {
	engine.suspend();
	status(engine).await
}

/// Resumes polling on every chain.
pub async fn resume(engine: &TrackerEngine) -> Result<TrackerStatusResponse, APIError> {
	engine.resume();
	status(engine).await
}
