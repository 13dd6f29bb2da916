//! Order handler for generic status transitions.
//!
//! Validates the requested edge up front, then dispatches: entering
//! `assigned_rider` runs automatic assignment, entering `delivered` runs
//! settlement with the best known payment method, entering `cancelled`
//! releases the rider in the same batch. Every other edge is a plain
//! state machine transition.

use crate::collaborators::{AuditLog, RiderDirectory};
use crate::engine::event_bus::EventBus;
use crate::handlers::{AssignmentHandler, DeliveryHandler};
use crate::state::{OrderError, OrderStateMachine};
use delivery_storage::{StorageService, Versioned};
use delivery_types::{
	current_time, truncate_id, Actor, DomainEvent, HistoryEntry, Order, OrderEvent, OrderStatus,
	RiderSelection, StorageKey,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for status transitions requested by actors.
pub struct OrderHandler {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	riders: Arc<dyn RiderDirectory>,
	assignment: Arc<AssignmentHandler>,
	delivery: Arc<DeliveryHandler>,
	event_bus: EventBus,
	audit: AuditLog,
}

impl OrderHandler {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		riders: Arc<dyn RiderDirectory>,
		assignment: Arc<AssignmentHandler>,
		delivery: Arc<DeliveryHandler>,
		event_bus: EventBus,
		audit: AuditLog,
	) -> Self {
		Self {
			storage,
			state_machine,
			riders,
			assignment,
			delivery,
			event_bus,
			audit,
		}
	}

	/// Moves an order to `to`, running the side effects of the target state.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), to = %to))]
	pub async fn transition(
		&self,
		order_id: &str,
		to: OrderStatus,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<HistoryEntry, OrderError> {
		let order = self.state_machine.get_order(order_id).await?;
		self.state_machine.table().check(order.status, to)?;

		match to {
			OrderStatus::AssignedRider => Ok(self
				.assignment
				.assign(order_id, &RiderSelection::Auto, actor, notes)
				.await?
				.history),
			OrderStatus::Delivered => {
				let method = order.effective_payment_method();
				let (_, entry) = self
					.delivery
					.post_delivery(order_id, method, Vec::new(), actor, notes)
					.await?;
				// A concurrent delivery got there first.
				entry.ok_or_else(|| OrderError::StaleState(order_id.to_string()))
			},
			OrderStatus::Cancelled => Ok(self.cancel(order_id, actor, notes).await?.1),
			_ => {
				let (order, entry) = self
					.state_machine
					.transition(order_id, to, actor, notes)
					.await?;
				self.announce(&order, &entry, actor).await;
				Ok(entry)
			},
		}
	}

	/// Cancels an order, freeing its rider in the same batch.
	///
	/// The order keeps its `rider_id` for the record.
	pub async fn cancel(
		&self,
		order_id: &str,
		actor: &Actor,
		reason: Option<String>,
	) -> Result<(Order, HistoryEntry), OrderError> {
		let Versioned { value: mut order, raw } = self.state_machine.get_versioned(order_id).await?;
		let entry = self.state_machine.apply(
			&mut order,
			OrderStatus::Cancelled,
			actor,
			reason,
			current_time(),
		)?;

		let mut tx = self.storage.transaction();
		self.state_machine.stage(&mut tx, &order, &entry, &raw)?;

		let mut released = None;
		if let Some(rider_id) = &order.rider_id {
			if let Some(Versioned { value: mut rider, raw: rider_raw }) = self.riders.rider(rider_id).await? {
				if rider.current_order_id.as_deref() == Some(order.id.as_str()) {
					rider.current_order_id = None;
					rider.is_available = true;
					tx.replace(StorageKey::Riders.as_str(), &rider.id, &rider, &rider_raw)?;
					released = Some(rider.id);
				}
			}
		}
		self.state_machine.commit(tx, order_id).await?;

		self.announce(&order, &entry, actor).await;
		if let Some(rider_id) = released {
			tracing::info!(
				order_id = %truncate_id(&order.id),
				rider_id = %truncate_id(&rider_id),
				"Rider released by cancellation"
			);
			self.event_bus
				.publish(DomainEvent::Order(OrderEvent::RiderReleased {
					order_id: order.id.clone(),
					rider_id,
				}))
				.ok();
		}
		Ok((order, entry))
	}

	async fn announce(&self, order: &Order, entry: &HistoryEntry, actor: &Actor) {
		tracing::info!(
			order_id = %truncate_id(&order.id),
			from = %entry.from_status,
			to = %entry.to_status,
			actor = %actor,
			"Order transitioned"
		);
		self.event_bus
			.publish(DomainEvent::Order(OrderEvent::StatusChanged {
				order_id: order.id.clone(),
				from: entry.from_status,
				to: entry.to_status,
				actor: actor.clone(),
			}))
			.ok();
		self.audit
			.record(
				actor,
				"order.transitioned",
				"order",
				&order.id,
				serde_json::json!({
					"from": entry.from_status,
					"to": entry.to_status,
					"notes": entry.notes,
				}),
			)
			.await;
	}
}

#[cfg(test)]
mod tests {
	use crate::state::{OrderError, TransitionTable};
	use crate::tests::{in_transit_order, order_in, sample_rider, test_engine};
	use delivery_types::{
		Actor, ActorKind, CreditTransactionType, OrderStatus, PayType, PaymentMethod,
	};

	#[tokio::test]
	async fn test_full_lifecycle_history() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		let entry = engine
			.orders
			.transition(&order.id, OrderStatus::Delivered, &Actor::new(ActorKind::Rider, "rider-1"), None)
			.await
			.unwrap();
		assert_eq!(entry.to_status, OrderStatus::Delivered);

		let history = engine.state_machine.history(&order.id).await.unwrap();
		assert_eq!(history.first().unwrap().from_status, OrderStatus::Cart);
		assert_eq!(history.last().unwrap().to_status, OrderStatus::Delivered);
		let table = TransitionTable::standard();
		for pair in history.windows(2) {
			assert_eq!(pair[0].to_status, pair[1].from_status);
		}
		assert!(history.iter().all(|e| table.permits(e.from_status, e.to_status)));

		// Declared cash applies when the rider confirmed nothing else.
		let rows = engine.ledger.history("rider-1").await.unwrap();
		assert_eq!(
			rows.iter().map(|r| r.transaction_type).collect::<Vec<_>>(),
			vec![
				CreditTransactionType::OrderFoodDebit,
				CreditTransactionType::OrderCommissionDebit
			]
		);
	}

	#[tokio::test]
	async fn test_transition_into_assigned_rider_assigns() {
		let engine = test_engine().await;
		let order = order_in(&engine, OrderStatus::Ready, PaymentMethod::Pos).await;
		engine.riders.upsert(&sample_rider("r1", PayType::FixedSalary, -12.121, -77.03)).await.unwrap();
		engine
			.orders
			.transition(&order.id, OrderStatus::AssignedRider, &Actor::system(), None)
			.await
			.unwrap();
		let stored = engine.state_machine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.rider_id.as_deref(), Some("r1"));
	}

	#[tokio::test]
	async fn test_cancel_releases_rider_and_keeps_reference() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		engine
			.orders
			.transition(&order.id, OrderStatus::Cancelled, &Actor::system(), Some("customer unreachable".into()))
			.await
			.unwrap();

		let stored = engine.state_machine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Cancelled);
		assert_eq!(stored.cancellation_reason.as_deref(), Some("customer unreachable"));
		assert_eq!(stored.rider_id.as_deref(), Some("rider-1"));
		let rider = engine.riders.rider("rider-1").await.unwrap().unwrap().value;
		assert!(rider.is_free());
		assert!(engine.ledger.history("rider-1").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_terminal_orders_do_not_move() {
		let engine = test_engine().await;
		let order = order_in(&engine, OrderStatus::Cart, PaymentMethod::Cash).await;
		engine
			.orders
			.transition(&order.id, OrderStatus::Cancelled, &Actor::system(), None)
			.await
			.unwrap();
		for to in [OrderStatus::Cancelled, OrderStatus::Delivered, OrderStatus::AwaitingConfirmation] {
			let err = engine
				.orders
				.transition(&order.id, to, &Actor::system(), None)
				.await
				.unwrap_err();
			match err {
				OrderError::InvalidTransition { allowed, .. } => assert!(allowed.is_empty()),
				other => panic!("unexpected error: {other}"),
			}
		}
	}
}
