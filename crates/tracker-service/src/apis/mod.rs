//! Request handling behind the HTTP routes.

pub mod tracker;
pub mod transaction;

use tracker_core::EngineError;
use tracker_types::APIError;

/// Maps engine failures onto API errors.
pub(crate) fn api_error(error: EngineError) -> APIError {
	let message = error.to_string();
	match error {
		EngineError::UnsupportedChain(_) => APIError::BadRequest {
			error_type: "UNSUPPORTED_CHAIN".to_string(),
			message,
		},
		EngineError::AlreadyExists(_) => APIError::Conflict {
			error_type: "TRANSACTION_EXISTS".to_string(),
			message,
		},
		EngineError::NotFound(_) => APIError::NotFound {
			error_type: "TRANSACTION_NOT_FOUND".to_string(),
			message,
		},
		EngineError::Service(_) => APIError::InternalServerError {
			error_type: "INTERNAL_ERROR".to_string(),
			message,
		},
	}
}
