//! HTTP server for the tracker API.
//!
//! Lets the wallet register submitted transactions, look them up, inspect
//! what is being tracked, and suspend or resume polling.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
	routing::{get, post},
	Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracker_config::ApiConfig;
use tracker_core::TrackerEngine;
use tracker_types::{APIError, NewTransaction, TrackerStatusResponse, TransactionResponse};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<TrackerEngine>,
}

/// Builds the router with every endpoint under `/api`.
pub fn router(engine: Arc<TrackerEngine>) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/transactions", post(handle_submit_transaction))
				.route("/transactions/{id}", get(handle_get_transaction))
				.route("/tracker", get(handle_status))
				.route("/tracker/suspend", post(handle_suspend))
				.route("/tracker/resume", post(handle_resume)),
		)
		.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
		.with_state(AppState { engine })
}

/// Starts the HTTP server and serves until it fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<TrackerEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Tracker API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Handles POST /api/transactions requests.
async fn handle_submit_transaction(
	State(state): State<AppState>,
	Json(request): Json<NewTransaction>,
) -> Result<(StatusCode, Json<TransactionResponse>), APIError> {
	match crate::apis::transaction::submit_transaction(request, &state.engine).await {
		Ok(response) => Ok((StatusCode::CREATED, Json(response))),
		Err(e) => {
			tracing::warn!("Transaction submission failed: {}", e);
			Err(e)
		},
	}
}

/// Handles GET /api/transactions/{id} requests.
async fn handle_get_transaction(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<TransactionResponse>, APIError> {
	crate::apis::transaction::get_transaction(id, &state.engine)
		.await
		.map(Json)
}

/// Handles GET /api/tracker requests.
async fn handle_status(
	State(state): State<AppState>,
) -> Result<Json<TrackerStatusResponse>, APIError> {
	crate::apis::tracker::status(&state.engine).await.map(Json)
}

/// Handles POST /api/tracker/suspend requests.
async fn handle_suspend(
	State(state): State<AppState>,
) -> Result<Json<TrackerStatusResponse>, APIError> {
	crate::apis::tracker::suspend(&state.engine).await.map(Json)
}

/// Handles POST /api/tracker/resume requests.
async fn handle_resume(
	State(state): State<AppState>,
) -> Result<Json<TrackerStatusResponse>, APIError> {
	crate::apis::tracker::resume(&state.engine).await.map(Json)
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use serde_json::{json, Value};
	use tower::ServiceExt;
	use tracker_config::Config;

	const CONFIG: &str = r#"
[tracker]
id = "api-test"

[networks.1]
rpc_url = "http://localhost:8545"

[storage]
primary = "memory"
[storage.implementations.memory]

[node]
[node.implementations.evm_alloy]
network_ids = [1]
"#;

	async fn app() -> Router {
		let config: Config = CONFIG.parse().unwrap();
		let engine = crate::factory_registry::build_engine_from_config(config)
			.await
			.unwrap();
		router(Arc::new(engine))
	}

	async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
		let request = Request::builder()
			.method(method)
			.uri(uri)
			.header("content-type", "application/json");
		let request = match body {
			Some(body) => request.body(Body::from(body.to_string())).unwrap(),
			None => request.body(Body::empty()).unwrap(),
		};

		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		let value = if bytes.is_empty() {
			Value::Null
		} else {
			serde_json::from_slice(&bytes).unwrap()
		};
		(status, value)
	}

	fn submission(chain_id: u64) -> Value {
		json!({
			"hash": format!("0x{}", "ab".repeat(32)),
			"chain_id": chain_id,
			"from": "0x00000000000000000000000000000000000000aa",
			"nonce": 3
		})
	}

	#[tokio::test]
	async fn test_submit_and_get_transaction() {
		let app = app().await;

		let (status, body) = send(&app, "POST", "/api/transactions", Some(submission(1))).await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(body["transaction"]["state"], "pending");
		assert_eq!(body["transaction"]["value"], "0");
		let id = body["transaction"]["id"].as_str().unwrap().to_string();

		let (status, body) = send(&app, "GET", &format!("/api/transactions/{}", id), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["transaction"]["nonce"], 3);

		let (status, body) = send(&app, "POST", "/api/transactions", Some(submission(1))).await;
		assert_eq!(status, StatusCode::CONFLICT);
		assert_eq!(body["error"], "TRANSACTION_EXISTS");
	}

	#[tokio::test]
	async fn test_rejects_bad_submissions() {
		let app = app().await;

		let (status, body) = send(&app, "POST", "/api/transactions", Some(submission(5))).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "UNSUPPORTED_CHAIN");

		let mut short_hash = submission(1);
		short_hash["hash"] = json!("0x1234");
		let (status, body) = send(&app, "POST", "/api/transactions", Some(short_hash)).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "INVALID_HASH");

		let (status, body) = send(&app, "GET", "/api/transactions/unknown", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["error"], "TRANSACTION_NOT_FOUND");
	}

	#[tokio::test]
	async fn test_suspend_and_resume() {
		let app = app().await;

		let (status, body) = send(&app, "GET", "/api/tracker", None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["suspended"], false);
		assert_eq!(body["tracked"]["1"], json!([]));

		let (_, body) = send(&app, "POST", "/api/tracker/suspend", None).await;
		assert_eq!(body["suspended"], true);

		let (_, body) = send(&app, "POST", "/api/tracker/resume", None).await;
		assert_eq!(body["suspended"], false);
	}
}
