//! Small helpers shared across crates.

use chrono::{DateTime, Utc};

/// Truncates an identifier for log output.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}

/// Current wall-clock time.
pub fn current_time() -> DateTime<Utc> {
	Utc::now()
}

/// Builds a short human-readable order code from a UUID string.
pub fn order_code(order_id: &str) -> String {
	let short: String = order_id
		.chars()
		.filter(|c| c.is_ascii_alphanumeric())
		.take(6)
		.collect();
	format!("ORD-{}", short.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("abc"), "abc");
		assert_eq!(truncate_id("0123456789"), "01234567..");
	}

	#[test]
	fn test_order_code() {
		assert_eq!(order_code("7f3a21c4-0000-4000-8000-000000000000"), "ORD-7F3A21");
	}
}
