//! Rider profile and assignment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{GeoPoint, HistoryEntry};

/// How a rider is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayType {
	/// Paid per delivery; settles cash through the credit ledger.
	Commission,
	/// Salaried; never touches the credit ledger.
	FixedSalary,
}

/// A rider as known to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderProfile {
	pub id: String,
	pub name: String,
	pub city_id: String,
	pub pay_type: PayType,
	pub is_online: bool,
	pub is_available: bool,
	/// At most one active order per rider.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub current_order_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub location: Option<GeoPoint>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_assigned_at: Option<DateTime<Utc>>,
}

impl RiderProfile {
	/// Online, available and not carrying anything.
	pub fn is_free(&self) -> bool {
		self.is_online && self.is_available && self.current_order_id.is_none()
	}

	pub fn uses_credit_ledger(&self) -> bool {
		self.pay_type == PayType::Commission
	}
}

/// Presence update pushed by the rider app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderPresence {
	pub is_online: bool,
	pub is_available: bool,
	#[serde(default)]
	pub location: Option<GeoPoint>,
}

/// Which rider to assign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RiderSelection {
	/// Rank eligible riders and take the best one.
	Auto,
	/// A rider picked by an operator.
	Specific(String),
}

impl From<String> for RiderSelection {
	fn from(value: String) -> Self {
		if value.eq_ignore_ascii_case("auto") {
			RiderSelection::Auto
		} else {
			RiderSelection::Specific(value)
		}
	}
}

impl From<RiderSelection> for String {
	fn from(value: RiderSelection) -> Self {
		match value {
			RiderSelection::Auto => "auto".to_string(),
			RiderSelection::Specific(id) => id,
		}
	}
}

impl fmt::Display for RiderSelection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RiderSelection::Auto => f.write_str("auto"),
			RiderSelection::Specific(id) => f.write_str(id),
		}
	}
}

/// Result of a successful assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
	pub order_id: String,
	pub rider_id: String,
	/// Distance from the restaurant when the rider was ranked.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub distance_meters: Option<u64>,
	/// Number of compare-and-swap attempts it took.
	pub attempts: u32,
	pub history: HistoryEntry,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rider_selection_from_string() {
		assert_eq!(RiderSelection::from("auto".to_string()), RiderSelection::Auto);
		assert_eq!(RiderSelection::from("AUTO".to_string()), RiderSelection::Auto);
		assert_eq!(
			RiderSelection::from("rider-7".to_string()),
			RiderSelection::Specific("rider-7".into())
		);
	}

	#[test]
	fn test_rider_selection_serde() {
		let parsed: RiderSelection = serde_json::from_str("\"auto\"").unwrap();
		assert_eq!(parsed, RiderSelection::Auto);
		let json = serde_json::to_string(&RiderSelection::Specific("r1".into())).unwrap();
		assert_eq!(json, "\"r1\"");
	}
}
