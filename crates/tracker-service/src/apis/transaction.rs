//! Transaction submission and lookup.

use super::api_error;
use tracker_core::TrackerEngine;
use tracker_types::{APIError, NewTransaction, TransactionId, TransactionResponse};

/// Registers a locally submitted transaction for tracking.
pub async fn submit_transaction(
	submitted: NewTransaction,
	engine: &TrackerEngine,
) -> Result<TransactionResponse, APIError> {
	if submitted.hash.0.len() != 32 {
		return Err(APIError::BadRequest {
			error_type: "INVALID_HASH".to_string(),
			message: format!(
				"Transaction hash must be 32 bytes, got {}",
				submitted.hash.0.len()
			),
		});
	}

	let transaction = engine.submit(submitted).await.map_err(api_error)?;
	Ok(TransactionResponse { transaction })
}

/// Looks a transaction up by id.
pub async fn get_transaction(
	id: String,
	engine: &TrackerEngine,
) -> Result<TransactionResponse, APIError> {
	let transaction = engine
		.transaction(&TransactionId::from(id))
		.await
		.map_err(api_error)?;
	Ok(TransactionResponse { transaction })
}
