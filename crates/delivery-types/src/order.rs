//! Order processing types for the delivery platform.
//!
//! This module defines the order aggregate, its status enumeration, the
//! explicit line item variants that replace loosely-typed item payloads, and
//! the immutable status history rows written on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{FeeDecision, GeoPoint};

/// Status of an order in its delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	Cart,
	AwaitingConfirmation,
	PendingConfirmation,
	Confirmed,
	Rejected,
	Preparing,
	Ready,
	AssignedRider,
	PickedUp,
	InTransit,
	Delivered,
	Cancelled,
}

impl OrderStatus {
	/// Returns the wire name of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Cart => "cart",
			OrderStatus::AwaitingConfirmation => "awaiting_confirmation",
			OrderStatus::PendingConfirmation => "pending_confirmation",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Rejected => "rejected",
			OrderStatus::Preparing => "preparing",
			OrderStatus::Ready => "ready",
			OrderStatus::AssignedRider => "assigned_rider",
			OrderStatus::PickedUp => "picked_up",
			OrderStatus::InTransit => "in_transit",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	/// Returns an iterator over all statuses in lifecycle order.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Cart,
			Self::AwaitingConfirmation,
			Self::PendingConfirmation,
			Self::Confirmed,
			Self::Rejected,
			Self::Preparing,
			Self::Ready,
			Self::AssignedRider,
			Self::PickedUp,
			Self::InTransit,
			Self::Delivered,
			Self::Cancelled,
		]
		.into_iter()
	}

	/// Delivered and cancelled orders accept no further transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| format!("Unknown order status: {}", s))
	}
}

/// Payment method declared by the customer or confirmed by the rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
	/// Rider physically collects the money.
	Cash,
	/// Card terminal carried by the rider, paid to the platform.
	Pos,
	/// Yape wallet transfer.
	Yape,
	/// Plin wallet transfer.
	Plin,
}

impl PaymentMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			PaymentMethod::Cash => "cash",
			PaymentMethod::Pos => "pos",
			PaymentMethod::Yape => "yape",
			PaymentMethod::Plin => "plin",
		}
	}

	/// Whether the platform received the money directly.
	pub fn is_digital(&self) -> bool {
		!matches!(self, PaymentMethod::Cash)
	}
}

impl fmt::Display for PaymentMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PaymentMethod {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"cash" => Ok(Self::Cash),
			"pos" => Ok(Self::Pos),
			"yape" => Ok(Self::Yape),
			"plin" => Ok(Self::Plin),
			_ => Err(format!("Unknown payment method: {}", s)),
		}
	}
}

/// A modifier chosen for a line item (extra cheese, size, sauce...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierSelection {
	/// Modifier group name, e.g. "Size".
	pub group: String,
	/// Selected option within the group, e.g. "Large".
	pub option: String,
	/// Price added per unit, in cents.
	#[serde(default)]
	pub price_delta_cents: i64,
}

/// One product line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
	pub product_id: String,
	pub name: String,
	pub quantity: u32,
	pub unit_price_cents: i64,
	#[serde(default)]
	pub modifiers: Vec<ModifierSelection>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
}

impl LineItem {
	/// Price of a single unit including its modifiers.
	pub fn unit_total_cents(&self) -> i64 {
		self.unit_price_cents
			+ self
				.modifiers
				.iter()
				.map(|m| m.price_delta_cents)
				.sum::<i64>()
	}

	/// Line total in cents.
	pub fn line_total_cents(&self) -> i64 {
		self.unit_total_cents() * i64::from(self.quantity)
	}
}

/// Kind of party that triggered a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
	Customer,
	Restaurant,
	Rider,
	Operator,
	System,
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
	pub kind: ActorKind,
	pub id: String,
}

impl Actor {
	pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
		Self {
			kind,
			id: id.into(),
		}
	}

	pub fn system() -> Self {
		Self::new(ActorKind::System, "system")
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let kind = match self.kind {
			ActorKind::Customer => "customer",
			ActorKind::Restaurant => "restaurant",
			ActorKind::Rider => "rider",
			ActorKind::Operator => "operator",
			ActorKind::System => "system",
		};
		write!(f, "{}:{}", kind, self.id)
	}
}

/// Per-status timestamps, stamped once when the status is entered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusTimestamps {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub awaiting_confirmation_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pending_confirmation_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confirmed_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rejected_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub preparing_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ready_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub assigned_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub picked_up_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub in_transit_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivered_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cancelled_at: Option<DateTime<Utc>>,
}

impl StatusTimestamps {
	/// Records the moment the given status was entered.
	///
	/// `cart` has no dedicated field; the order's `created_at` covers it.
	pub fn stamp(&mut self, status: OrderStatus, at: DateTime<Utc>) {
		let slot = match status {
			OrderStatus::Cart => return,
			OrderStatus::AwaitingConfirmation => &mut self.awaiting_confirmation_at,
			OrderStatus::PendingConfirmation => &mut self.pending_confirmation_at,
			OrderStatus::Confirmed => &mut self.confirmed_at,
			OrderStatus::Rejected => &mut self.rejected_at,
			OrderStatus::Preparing => &mut self.preparing_at,
			OrderStatus::Ready => &mut self.ready_at,
			OrderStatus::AssignedRider => &mut self.assigned_at,
			OrderStatus::PickedUp => &mut self.picked_up_at,
			OrderStatus::InTransit => &mut self.in_transit_at,
			OrderStatus::Delivered => &mut self.delivered_at,
			OrderStatus::Cancelled => &mut self.cancelled_at,
		};
		*slot = Some(at);
	}
}

/// The order aggregate.
///
/// Orders are created in `cart`, mutated only through state machine
/// transitions and never deleted. Every committed change bumps `version`,
/// which is what the optimistic concurrency checks rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier (UUID v4).
	pub id: String,
	/// Short human-readable code shown to customers and riders.
	pub code: String,
	pub status: OrderStatus,
	pub version: u64,
	pub city_id: String,
	pub restaurant_id: String,
	pub customer_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rider_id: Option<String>,
	/// Method declared by the customer at checkout.
	pub payment_method: PaymentMethod,
	/// Method confirmed by the rider at delivery; governs settlement.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub actual_payment_method: Option<PaymentMethod>,
	pub items: Vec<LineItem>,
	pub subtotal_cents: i64,
	pub delivery_fee_cents: i64,
	pub service_fee_cents: i64,
	/// Platform-absorbed bonus paid to the rider; not charged to the customer.
	pub rider_bonus_cents: i64,
	pub discount_cents: i64,
	pub total_cents: i64,
	/// How the delivery fee was decided.
	pub fee: FeeDecision,
	pub delivery_location: GeoPoint,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivery_address: Option<String>,
	#[serde(default)]
	pub timestamps: StatusTimestamps,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rejection_reason: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cancellation_reason: Option<String>,
	/// Opaque references returned by the evidence storage collaborator.
	#[serde(default)]
	pub evidence_refs: Vec<String>,
	/// Number of history rows written so far.
	#[serde(default)]
	pub history_len: u32,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// The method that decides settlement: rider-confirmed if known,
	/// otherwise the customer's declaration.
	pub fn effective_payment_method(&self) -> PaymentMethod {
		self.actual_payment_method.unwrap_or(self.payment_method)
	}

	/// Checks `total = subtotal + delivery_fee + service_fee - discount`.
	pub fn totals_consistent(&self) -> bool {
		self.total_cents
			== self.subtotal_cents + self.delivery_fee_cents + self.service_fee_cents
				- self.discount_cents
	}

	pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
		self.timestamps.delivered_at
	}
}

/// One immutable row of an order's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
	pub order_id: String,
	/// Position in the order's history, starting at 1.
	pub sequence: u32,
	pub from_status: OrderStatus,
	pub to_status: OrderStatus,
	pub actor: Actor,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	pub at: DateTime<Utc>,
}

impl HistoryEntry {
	/// Storage id of the entry, sortable within an order.
	pub fn storage_id(order_id: &str, sequence: u32) -> String {
		format!("{}:{:04}", order_id, sequence)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_round_trips_through_wire_name() {
		for status in OrderStatus::all() {
			assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
		}
		assert!("shipped".parse::<OrderStatus>().is_err());
	}

	#[test]
	fn test_status_serde_uses_snake_case() {
		let json = serde_json::to_string(&OrderStatus::AssignedRider).unwrap();
		assert_eq!(json, "\"assigned_rider\"");
	}

	#[test]
	fn test_only_delivered_and_cancelled_are_terminal() {
		let terminal: Vec<_> = OrderStatus::all().filter(OrderStatus::is_terminal).collect();
		assert_eq!(terminal, vec![OrderStatus::Delivered, OrderStatus::Cancelled]);
		assert!(!OrderStatus::Rejected.is_terminal());
	}

	#[test]
	fn test_line_item_totals_include_modifiers() {
		let item = LineItem {
			product_id: "p1".into(),
			name: "Lomo saltado".into(),
			quantity: 2,
			unit_price_cents: 2500,
			modifiers: vec![ModifierSelection {
				group: "Extra".into(),
				option: "Huevo".into(),
				price_delta_cents: 300,
			}],
			note: None,
		};
		assert_eq!(item.unit_total_cents(), 2800);
		assert_eq!(item.line_total_cents(), 5600);
	}

	#[test]
	fn test_stamp_sets_matching_field() {
		let mut ts = StatusTimestamps::default();
		let now = Utc::now();
		ts.stamp(OrderStatus::PickedUp, now);
		ts.stamp(OrderStatus::Cart, now);
		assert_eq!(ts.picked_up_at, Some(now));
		assert!(ts.delivered_at.is_none());
	}

	#[test]
	fn test_history_storage_id_sorts_lexicographically() {
		let a = HistoryEntry::storage_id("o1", 2);
		let b = HistoryEntry::storage_id("o1", 10);
		assert!(a < b);
	}
}
