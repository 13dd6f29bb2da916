//! Delivery zones, restaurants and fee results.

use serde::{Deserialize, Serialize};

use crate::GeoPoint;

/// A coverage region with its fee rule.
///
/// Zones are reference data owned by an external admin workflow; this core
/// only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryZone {
	pub id: String,
	pub city_id: String,
	pub name: String,
	/// Polygon vertices in order.
	pub polygon: Vec<GeoPoint>,
	/// Flat fee charged for any destination in the zone.
	pub base_fee_cents: i64,
	/// Distance covered by the base fee.
	#[serde(default)]
	pub included_meters: u64,
	/// Charged per started kilometre beyond `included_meters`.
	#[serde(default)]
	pub per_km_fee_cents: i64,
	/// Overlap tie-break: higher wins.
	#[serde(default)]
	pub priority: i32,
}

/// A restaurant as seen by pricing and dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
	pub id: String,
	pub city_id: String,
	pub name: String,
	pub location: GeoPoint,
}

/// Output of the zone pricing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeResult {
	pub restaurant_id: String,
	pub city_id: String,
	/// Engine fee; `None` when the destination is not covered.
	pub fee_cents: Option<i64>,
	pub zone_id: Option<String>,
	pub zone_name: Option<String>,
	pub is_covered: bool,
	/// Great-circle distance origin to destination, rounded up.
	pub distance_meters: u64,
}

/// How an order's delivery fee was decided.
///
/// The engine-computed fee is always retained next to an operator override
/// so the variance can be audited and the override undone exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDecision {
	pub fee_cents: i64,
	pub is_manual: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub calculated_cents: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub zone_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub zone_name: Option<String>,
}

impl FeeDecision {
	/// Uses the engine fee. Returns `None` for an uncovered destination.
	pub fn calculated(result: &FeeResult) -> Option<Self> {
		let fee = result.fee_cents?;
		Some(Self {
			fee_cents: fee,
			is_manual: false,
			calculated_cents: Some(fee),
			zone_id: result.zone_id.clone(),
			zone_name: result.zone_name.clone(),
		})
	}

	/// Operator-entered fee, keeping whatever the engine computed.
	pub fn manual(fee_cents: i64, result: &FeeResult) -> Self {
		Self {
			fee_cents,
			is_manual: true,
			calculated_cents: result.fee_cents,
			zone_id: result.zone_id.clone(),
			zone_name: result.zone_name.clone(),
		}
	}

	/// Drops a manual override and goes back to the engine fee.
	///
	/// Returns `None` if there is no engine fee to go back to.
	pub fn recalculated(&self) -> Option<Self> {
		let fee = self.calculated_cents?;
		Some(Self {
			fee_cents: fee,
			is_manual: false,
			calculated_cents: Some(fee),
			zone_id: self.zone_id.clone(),
			zone_name: self.zone_name.clone(),
		})
	}

	/// A manual fee below the engine fee is a loss for the platform.
	pub fn is_loss(&self) -> bool {
		self.is_manual
			&& self
				.calculated_cents
				.is_some_and(|calculated| self.fee_cents < calculated)
	}

	/// Manual minus calculated; negative for a loss.
	pub fn variance_cents(&self) -> Option<i64> {
		self.calculated_cents.map(|c| self.fee_cents - c)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn covered(fee: i64) -> FeeResult {
		FeeResult {
			restaurant_id: "r1".into(),
			city_id: "lima".into(),
			fee_cents: Some(fee),
			zone_id: Some("z1".into()),
			zone_name: Some("Miraflores".into()),
			is_covered: true,
			distance_meters: 1800,
		}
	}

	#[test]
	fn test_override_then_recalculate_restores_engine_fee() {
		let result = covered(650);
		let engine = FeeDecision::calculated(&result).unwrap();
		let manual = FeeDecision::manual(400, &result);
		assert!(manual.is_loss());
		assert_eq!(manual.variance_cents(), Some(-250));

		let back = manual.recalculated().unwrap();
		assert_eq!(back, engine);
		assert_eq!(back.fee_cents, 650);
	}

	#[test]
	fn test_manual_above_engine_is_not_loss() {
		let manual = FeeDecision::manual(900, &covered(650));
		assert!(!manual.is_loss());
	}

	#[test]
	fn test_uncovered_has_no_engine_decision() {
		let mut result = covered(0);
		result.fee_cents = None;
		result.is_covered = false;
		assert!(FeeDecision::calculated(&result).is_none());
		let manual = FeeDecision::manual(700, &result);
		assert!(!manual.is_loss());
		assert!(manual.recalculated().is_none());
	}
}
