//! Checkout handler.
//!
//! Turns a validated checkout request into an order in `cart`, pricing the
//! delivery fee through the zone engine unless the operator supplied one.

use crate::collaborators::AuditLog;
use crate::engine::event_bus::EventBus;
use crate::state::{OrderError, OrderStateMachine};
use delivery_pricing::PricingEngine;
use delivery_types::{
	current_time, truncate_id, utils::order_code, Actor, CheckoutRequest, DomainEvent, FeeDecision,
	Order, OrderEvent, OrderStatus, PricingEvent, StatusTimestamps,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for creating orders from checkout requests.
pub struct CheckoutHandler {
	pricing: Arc<PricingEngine>,
	state_machine: Arc<OrderStateMachine>,
	event_bus: EventBus,
	audit: AuditLog,
}

impl CheckoutHandler {
	pub fn new(
		pricing: Arc<PricingEngine>,
		state_machine: Arc<OrderStateMachine>,
		event_bus: EventBus,
		audit: AuditLog,
	) -> Self {
		Self {
			pricing,
			state_machine,
			event_bus,
			audit,
		}
	}

	/// Validates the request, prices it and stores the new order.
	#[instrument(skip_all, fields(restaurant_id = %truncate_id(&request.restaurant_id)))]
	pub async fn create_order(
		&self,
		request: CheckoutRequest,
		actor: &Actor,
	) -> Result<Order, OrderError> {
		request.check().map_err(OrderError::Validation)?;

		let order_id = Uuid::new_v4().to_string();
		let quote = self
			.pricing
			.compute_fee(None, request.delivery_location, &request.restaurant_id)
			.await?;

		let mut events = Vec::new();
		let fee = match request.manual_delivery_fee_cents {
			Some(manual) => {
				let decision = self.pricing.apply_override(manual, &quote);
				if decision.is_loss() {
					events.push(DomainEvent::Pricing(PricingEvent::FeeLossFlagged {
						order_id: Some(order_id.clone()),
						zone_id: decision.zone_id.clone(),
						calculated_cents: decision.calculated_cents.unwrap_or_default(),
						manual_cents: manual,
					}));
				}
				decision
			},
			None => match FeeDecision::calculated(&quote) {
				Some(decision) => decision,
				None => {
					self.event_bus
						.publish(DomainEvent::Pricing(PricingEvent::DestinationUncovered {
							restaurant_id: quote.restaurant_id.clone(),
							city_id: quote.city_id.clone(),
						}))
						.ok();
					return Err(OrderError::ZoneUncovered(request.restaurant_id));
				},
			},
		};

		let subtotal_cents = request.subtotal_cents();
		let charges_cents = subtotal_cents + fee.fee_cents + request.service_fee_cents;
		if request.discount_cents > charges_cents {
			return Err(OrderError::Validation(format!(
				"discount {} exceeds order charges {}",
				request.discount_cents, charges_cents
			)));
		}

		let now = current_time();
		let order = Order {
			code: order_code(&order_id),
			id: order_id,
			status: OrderStatus::Cart,
			version: 1,
			city_id: quote.city_id,
			restaurant_id: request.restaurant_id.clone(),
			customer_id: request.customer_id.clone(),
			rider_id: None,
			payment_method: request.payment_method,
			actual_payment_method: None,
			items: request.line_items(),
			subtotal_cents,
			delivery_fee_cents: fee.fee_cents,
			service_fee_cents: request.service_fee_cents,
			rider_bonus_cents: request.rider_bonus_cents,
			discount_cents: request.discount_cents,
			total_cents: charges_cents - request.discount_cents,
			fee,
			delivery_location: request.delivery_location,
			delivery_address: request.delivery_address,
			timestamps: StatusTimestamps::default(),
			rejection_reason: None,
			cancellation_reason: None,
			evidence_refs: Vec::new(),
			history_len: 0,
			created_at: now,
			updated_at: now,
		};
		self.state_machine.create(&order).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			code = %order.code,
			total_cents = order.total_cents,
			manual_fee = order.fee.is_manual,
			"Order created"
		);
		self.event_bus
			.publish(DomainEvent::Order(OrderEvent::Created {
				order_id: order.id.clone(),
				code: order.code.clone(),
				city_id: order.city_id.clone(),
				total_cents: order.total_cents,
			}))
			.ok();
		for event in events {
			self.event_bus.publish(event).ok();
		}
		self.audit
			.record(
				actor,
				"order.created",
				"order",
				&order.id,
				serde_json::json!({
					"total_cents": order.total_cents,
					"delivery_fee_cents": order.delivery_fee_cents,
					"fee_is_manual": order.fee.is_manual,
				}),
			)
			.await;
		Ok(order)
	}
}
