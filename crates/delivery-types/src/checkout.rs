//! Checkout request types.
//!
//! A checkout request arrives fully formed from the customer application and
//! is validated once here; everything downstream works with the plain
//! [`LineItem`] values produced from it.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{GeoPoint, LineItem, ModifierSelection, PaymentMethod};

/// Upper bound for any single price input, in cents.
const MAX_PRICE_CENTS: i64 = 10_000_000;

fn valid_point(point: &GeoPoint) -> Result<(), validator::ValidationError> {
	if point.is_valid() {
		Ok(())
	} else {
		Err(validator::ValidationError::new("coordinates_out_of_range"))
	}
}

/// A modifier as submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutModifier {
	#[validate(length(min = 1, max = 80))]
	pub group: String,
	#[validate(length(min = 1, max = 80))]
	pub option: String,
	#[serde(default)]
	#[validate(range(min = 0, max = MAX_PRICE_CENTS))]
	pub price_delta_cents: i64,
}

/// A product line as submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutItem {
	#[validate(length(min = 1))]
	pub product_id: String,
	#[validate(length(min = 1, max = 200))]
	pub name: String,
	#[validate(range(min = 1, max = 99))]
	pub quantity: u32,
	#[validate(range(min = 0, max = MAX_PRICE_CENTS))]
	pub unit_price_cents: i64,
	#[serde(default)]
	#[validate(nested)]
	pub modifiers: Vec<CheckoutModifier>,
	#[serde(default)]
	#[validate(length(max = 500))]
	pub note: Option<String>,
}

impl From<&CheckoutItem> for LineItem {
	fn from(item: &CheckoutItem) -> Self {
		LineItem {
			product_id: item.product_id.clone(),
			name: item.name.clone(),
			quantity: item.quantity,
			unit_price_cents: item.unit_price_cents,
			modifiers: item
				.modifiers
				.iter()
				.map(|m| ModifierSelection {
					group: m.group.clone(),
					option: m.option.clone(),
					price_delta_cents: m.price_delta_cents,
				})
				.collect(),
			note: item.note.clone(),
		}
	}
}

/// Request body for `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
	#[validate(length(min = 1))]
	pub customer_id: String,
	#[validate(length(min = 1))]
	pub restaurant_id: String,
	#[validate(length(min = 1, max = 100), nested)]
	pub items: Vec<CheckoutItem>,
	pub payment_method: PaymentMethod,
	#[validate(custom(function = "valid_point"))]
	pub delivery_location: GeoPoint,
	#[serde(default)]
	#[validate(length(max = 500))]
	pub delivery_address: Option<String>,
	#[serde(default)]
	#[validate(range(min = 0, max = MAX_PRICE_CENTS))]
	pub service_fee_cents: i64,
	#[serde(default)]
	#[validate(range(min = 0, max = MAX_PRICE_CENTS))]
	pub rider_bonus_cents: i64,
	#[serde(default)]
	#[validate(range(min = 0, max = MAX_PRICE_CENTS))]
	pub discount_cents: i64,
	/// Operator-entered delivery fee replacing the engine's.
	#[serde(default)]
	#[validate(range(min = 0, max = MAX_PRICE_CENTS))]
	pub manual_delivery_fee_cents: Option<i64>,
}

impl CheckoutRequest {
	/// Runs field validation and flattens the report into one message.
	pub fn check(&self) -> Result<(), String> {
		self.validate().map_err(|e| e.to_string())
	}

	pub fn line_items(&self) -> Vec<LineItem> {
		self.items.iter().map(LineItem::from).collect()
	}

	/// Sum of all line totals, modifiers included.
	pub fn subtotal_cents(&self) -> i64 {
		self.line_items().iter().map(LineItem::line_total_cents).sum()
	}
}
