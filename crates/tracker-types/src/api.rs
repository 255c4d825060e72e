//! API types for the tracker HTTP endpoints.

use crate::{Transaction, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Response body for `GET /api/tracker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatusResponse {
	/// Whether polling is currently suspended.
	pub suspended: bool,
	/// Tracked transaction ids per chain.
	pub tracked: BTreeMap<u64, Vec<TransactionId>>,
}

/// Response body for transaction lookups and submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
	pub transaction: Transaction,
}

/// JSON body returned for every API error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug, Clone)]
pub enum APIError {
	/// Malformed request (400)
	BadRequest { error_type: String, message: String },
	/// Unknown resource (404)
	NotFound { error_type: String, message: String },
	/// Request conflicts with existing state (409)
	Conflict { error_type: String, message: String },
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error_type, message) = match self {
			APIError::BadRequest {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::Conflict {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message),
		};
		ErrorResponse {
			error: error_type.clone(),
			message: message.clone(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{} ({}): {}", response.error, self.status_code(), response.message)
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_mapping() {
		let error = APIError::NotFound {
			error_type: "TRANSACTION_NOT_FOUND".to_string(),
			message: "no such transaction".to_string(),
		};
		assert_eq!(error.status_code(), 404);
		let body = serde_json::to_value(error.to_error_response()).unwrap();
		assert_eq!(body["error"], "TRANSACTION_NOT_FOUND");
		assert!(error.to_string().contains("404"));
	}
}
