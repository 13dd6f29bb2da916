//! Domain event types.
//!
//! Events are published on the core's event bus after the corresponding state
//! change has committed. Dashboards, rider apps and tracking pages consume
//! them through whatever transport relays the bus; the core never depends on
//! whether anyone received them.

use serde::{Deserialize, Serialize};

use crate::{Actor, CreditBand, CreditTransaction, OrderStatus, SettlementResult};

/// Main event type encompassing all domain events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
	/// Events from the order state machine.
	Order(OrderEvent),
	/// Events from the rider credit ledger.
	Ledger(LedgerEvent),
	/// Events from the pricing engine.
	Pricing(PricingEvent),
}

/// Events related to the order lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A checkout request produced a new order in `cart`.
	Created {
		order_id: String,
		code: String,
		city_id: String,
		total_cents: i64,
	},
	/// An order moved along an edge of the transition table.
	StatusChanged {
		order_id: String,
		from: OrderStatus,
		to: OrderStatus,
		actor: Actor,
	},
	/// A rider took the order.
	RiderAssigned {
		order_id: String,
		rider_id: String,
		distance_meters: Option<u64>,
	},
	/// A rider was freed, either by delivery or cancellation.
	RiderReleased { order_id: String, rider_id: String },
	/// The order was delivered and settled.
	Delivered {
		order_id: String,
		settlement: SettlementResult,
	},
}

/// Events related to the credit ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEvent {
	/// A row was appended.
	TransactionPosted { transaction: CreditTransaction },
	/// A rider's balance crossed a threshold.
	BandChanged {
		rider_id: String,
		from: CreditBand,
		to: CreditBand,
		balance_cents: i64,
	},
}

/// Events related to delivery pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PricingEvent {
	/// An operator set a fee below the engine's calculation.
	FeeLossFlagged {
		order_id: Option<String>,
		zone_id: Option<String>,
		calculated_cents: i64,
		manual_cents: i64,
	},
	/// A destination fell outside every zone.
	DestinationUncovered {
		restaurant_id: String,
		city_id: String,
	},
}
