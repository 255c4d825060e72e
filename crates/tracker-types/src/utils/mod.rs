//! Formatting and time helpers used across the tracker crates.

pub mod formatting;

pub use formatting::{truncate_id, with_0x_prefix, without_0x_prefix};

/// Current UNIX timestamp in seconds, or 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
