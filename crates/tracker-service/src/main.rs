//! Main entry point for the pending transaction tracker service.
//!
//! Watches locally submitted transactions on every configured chain until
//! they land in a block or are dropped, and optionally serves an HTTP API
//! for submitting transactions and controlling polling.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracker_config::Config;

mod apis;
mod factory_registry;
mod server;

/// Command-line arguments for the tracker service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started tracker");

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.tracker.id);

	let engine = factory_registry::build_engine_from_config(config.clone()).await?;
	let engine = Arc::new(engine);

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			let api_task = server::start_server(api_config, Arc::clone(&engine));

			tokio::select! {
				result = engine.run() => {
					tracing::info!("Tracker finished");
					result?;
				}
				result = api_task => {
					tracing::info!("API server finished");
					engine.shutdown().await;
					result?;
				}
			}
		},
		None => {
			tracing::info!("Starting tracker only");
			engine.run().await?;
		},
	}

	tracing::info!("Stopped tracker");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_args_defaults() {
		let args = Args::try_parse_from(["tracker"]).unwrap();
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_overrides() {
		let args =
			Args::try_parse_from(["tracker", "--config", "wallet.toml", "-l", "debug"]).unwrap();
		assert_eq!(args.config, PathBuf::from("wallet.toml"));
		assert_eq!(args.log_level, "debug");
	}
}
