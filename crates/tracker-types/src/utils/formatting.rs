//! String formatting utilities.

/// Shortens a hex string for log output.
///
/// Keeps the first 10 characters (enough for "0x" plus four bytes) followed by "..".
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(10) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

/// Adds "0x" prefix to a hex string if it doesn't already have one.
pub fn with_0x_prefix(hex_str: &str) -> String {
	if hex_str.starts_with("0x") || hex_str.starts_with("0X") {
		hex_str.to_string()
	} else {
		format!("0x{}", hex_str)
	}
}

/// Removes "0x" or "0X" prefix from a hex string if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("0x12345678"), "0x12345678");
		assert_eq!(truncate_id("0x1234567890abcdef"), "0x12345678..");
		assert_eq!(truncate_id(""), "");
	}

	#[test]
	fn test_prefix_helpers() {
		assert_eq!(with_0x_prefix("5fbd"), "0x5fbd");
		assert_eq!(with_0x_prefix("0x5fbd"), "0x5fbd");
		assert_eq!(with_0x_prefix("0X5fbd"), "0X5fbd");

		assert_eq!(without_0x_prefix("0x5fbd"), "5fbd");
		assert_eq!(without_0x_prefix("0X5fbd"), "5fbd");
		assert_eq!(without_0x_prefix("5fbd"), "5fbd");
	}
}
