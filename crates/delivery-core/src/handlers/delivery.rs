//! Delivery handler.
//!
//! Completing a delivery writes the order, its history row, the rider's
//! ledger rows and the rider release in a single batch. Either all of it
//! lands or none of it does.

use crate::collaborators::{AuditLog, RiderDirectory};
use crate::engine::event_bus::EventBus;
use crate::state::{OrderError, OrderStateMachine};
use delivery_ledger::{CreditLedger, PreparedSettlement};
use delivery_storage::{StorageService, Versioned};
use delivery_types::{
	current_time, truncate_id, Actor, DomainEvent, HistoryEntry, LedgerEvent, Order, OrderEvent,
	OrderStatus, PaymentMethod, RiderProfile, SettlementResult, StorageKey,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for delivering and settling orders.
pub struct DeliveryHandler {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	riders: Arc<dyn RiderDirectory>,
	ledger: Arc<CreditLedger>,
	event_bus: EventBus,
	audit: AuditLog,
	max_attempts: u32,
}

impl DeliveryHandler {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		riders: Arc<dyn RiderDirectory>,
		ledger: Arc<CreditLedger>,
		event_bus: EventBus,
		audit: AuditLog,
		max_attempts: u32,
	) -> Self {
		Self {
			storage,
			state_machine,
			riders,
			ledger,
			event_bus,
			audit,
			max_attempts: max_attempts.max(1),
		}
	}

	/// The assigned rider's record.
	///
	/// Only a cash settlement needs it. For any other method a missing record
	/// just leaves nobody to release.
	async fn rider_of(
		&self,
		order: &Order,
		method: PaymentMethod,
	) -> Result<Option<Versioned<RiderProfile>>, OrderError> {
		let Some(rider_id) = &order.rider_id else {
			return Ok(None);
		};
		match self.riders.rider(rider_id).await? {
			Some(rider) => Ok(Some(rider)),
			None if !method.is_digital() => Err(OrderError::RiderNotFound(rider_id.clone())),
			None => {
				tracing::warn!(
					rider_id = %truncate_id(rider_id),
					"Assigned rider has no record; settling without ledger rows"
				);
				Ok(None)
			},
		}
	}

	/// Marks an in-transit order delivered and settles it.
	///
	/// Calling again for a delivered order returns the original settlement
	/// with `already_settled` set, provided the payment method matches. The
	/// history row is only returned by the call that performed the delivery.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), method = %method))]
	pub async fn post_delivery(
		&self,
		order_id: &str,
		method: PaymentMethod,
		evidence_refs: Vec<String>,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<(SettlementResult, Option<HistoryEntry>), OrderError> {
		let mut attempt = 0;
		loop {
			attempt += 1;
			match self
				.deliver_once(order_id, method, &evidence_refs, actor, notes.clone())
				.await
			{
				Err(e) if e.is_retryable() && attempt < self.max_attempts => {
					tracing::debug!(attempt, error = %e, "Retrying delivery");
				},
				outcome => return outcome,
			}
		}
	}

	/// One read, stage and commit of a delivery.
	async fn deliver_once(
		&self,
		order_id: &str,
		method: PaymentMethod,
		evidence_refs: &[String],
		actor: &Actor,
		notes: Option<String>,
	) -> Result<(SettlementResult, Option<HistoryEntry>), OrderError> {
		let Versioned { value: mut order, raw } = self.state_machine.get_versioned(order_id).await?;
		if order.status == OrderStatus::Delivered {
			return Ok((self.replay(&order, method).await?, None));
		}
		self.state_machine
			.table()
			.check(order.status, OrderStatus::Delivered)?;

		let rider = self.rider_of(&order, method).await?;
		order.actual_payment_method = Some(method);
		order.evidence_refs.extend(evidence_refs.iter().cloned());
		let entry = self.state_machine.apply(
			&mut order,
			OrderStatus::Delivered,
			actor,
			notes,
			current_time(),
		)?;

		let mut tx = self.storage.transaction();
		let mut prepared = self
			.ledger
			.prepare_settlement(&mut tx, &order, rider.as_ref().map(|r| &r.value), method)
			.await
			.inspect_err(|e| tracing::error!(error = %e, "Ledger settlement failed"))?;
		if prepared.result.rider_id.is_none() {
			prepared.result.rider_id = order.rider_id.clone();
		}

		let mut released = None;
		if let Some(Versioned { value: mut rider, raw: rider_raw }) = rider {
			if rider.current_order_id.as_deref() == Some(order.id.as_str()) {
				rider.current_order_id = None;
				rider.is_available = true;
				tx.replace(StorageKey::Riders.as_str(), &rider.id, &rider, &rider_raw)?;
				released = Some(rider.id);
			} else {
				// The settlement was computed from this profile.
				tx.check_unchanged(StorageKey::Riders.as_str(), &rider.id, &rider_raw);
			}
		}
		self.state_machine.stage(&mut tx, &order, &entry, &raw)?;
		self.state_machine.commit(tx, order_id).await?;

		self.publish(&order, &entry, &prepared, released, actor)
			.await;
		Ok((prepared.result, Some(entry)))
	}

	/// Settlement of an already delivered order.
	async fn replay(&self, order: &Order, method: PaymentMethod) -> Result<SettlementResult, OrderError> {
		let recorded = order.effective_payment_method();
		if recorded != method {
			return Err(OrderError::PaymentMethodMismatch {
				order_id: order.id.clone(),
				recorded,
				requested: method,
			});
		}
		let rider = self.rider_of(order, method).await?;
		// Existing rows are found by id, so nothing new is staged here.
		let mut scratch = self.storage.transaction();
		let mut prepared = self
			.ledger
			.prepare_settlement(&mut scratch, order, rider.as_ref().map(|r| &r.value), method)
			.await?;
		if !scratch.is_empty() {
			return Err(OrderError::SettlementFailed(format!(
				"order {} is delivered but has no ledger rows",
				order.code
			)));
		}
		if prepared.result.rider_id.is_none() {
			prepared.result.rider_id = order.rider_id.clone();
		}
		let mut result = prepared.result;
		result.already_settled = true;
		Ok(result)
	}

	async fn publish(
		&self,
		order: &Order,
		entry: &HistoryEntry,
		prepared: &PreparedSettlement,
		released_rider: Option<String>,
		actor: &Actor,
	) {
		tracing::info!(
			order_id = %truncate_id(&order.id),
			method = %prepared.result.actual_payment_method,
			rows = prepared.result.transactions.len(),
			"Order delivered"
		);
		self.event_bus
			.publish(DomainEvent::Order(OrderEvent::StatusChanged {
				order_id: order.id.clone(),
				from: entry.from_status,
				to: entry.to_status,
				actor: actor.clone(),
			}))
			.ok();
		if let Some(posting) = &prepared.posting {
			for transaction in &posting.transactions {
				self.event_bus
					.publish(DomainEvent::Ledger(LedgerEvent::TransactionPosted {
						transaction: transaction.clone(),
					}))
					.ok();
			}
			if let Some((from, to)) = posting.band_change(self.ledger.policy()) {
				self.event_bus
					.publish(DomainEvent::Ledger(LedgerEvent::BandChanged {
						rider_id: posting.rider_id.clone(),
						from,
						to,
						balance_cents: posting.balance_after_cents,
					}))
					.ok();
			}
		}
		if let Some(rider_id) = released_rider {
			self.event_bus
				.publish(DomainEvent::Order(OrderEvent::RiderReleased {
					order_id: order.id.clone(),
					rider_id,
				}))
				.ok();
		}
		self.event_bus
			.publish(DomainEvent::Order(OrderEvent::Delivered {
				order_id: order.id.clone(),
				settlement: prepared.result.clone(),
			}))
			.ok();
		self.audit
			.record(
				actor,
				"order.delivered",
				"order",
				&order.id,
				serde_json::json!({
					"payment_method": prepared.result.actual_payment_method,
					"evidence_refs": order.evidence_refs,
				}),
			)
			.await;
	}
}

#[cfg(test)]
mod tests {
	use crate::state::OrderError;
	use crate::tests::{flaky_engine, in_transit_order, test_config, test_engine, Faults};
	use delivery_storage::StorageError;
	use delivery_types::{
		Actor, CreditTransactionType, OrderStatus, PayType, PaymentMethod, StorageKey,
	};

	#[tokio::test]
	async fn test_cash_delivery_posts_food_and_commission() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		let (result, entry) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec!["photo-1".into()], &Actor::system(), None)
			.await
			.unwrap();

		assert_eq!(entry.unwrap().to_status, OrderStatus::Delivered);
		assert!(!result.already_settled);
		let debits: Vec<(CreditTransactionType, i64)> = result
			.transactions
			.iter()
			.map(|t| (t.transaction_type, t.amount_cents))
			.collect();
		assert_eq!(
			debits,
			vec![
				(CreditTransactionType::OrderFoodDebit, -2000),
				(CreditTransactionType::OrderCommissionDebit, -100),
			]
		);
		assert_eq!(result.rider_earnings_cents, Some(400));

		let stored = engine.state_machine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.actual_payment_method, Some(PaymentMethod::Cash));
		assert_eq!(stored.evidence_refs, vec!["photo-1".to_string()]);
		assert!(stored.delivered_at().is_some());

		let rider = engine.riders.rider("rider-1").await.unwrap().unwrap().value;
		assert_eq!(rider.current_order_id, None);
		assert!(rider.is_available);
	}

	#[tokio::test]
	async fn test_rider_confirmed_method_overrides_declaration() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		let (result, _) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Yape, vec![], &Actor::system(), None)
			.await
			.unwrap();
		assert!(result.transactions.is_empty());
		assert!(engine.ledger.history("rider-1").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_double_delivery_matches_single_call() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		let (first, _) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec![], &Actor::system(), None)
			.await
			.unwrap();
		let balance = engine.ledger.balance("rider-1").await.unwrap();

		let (second, entry) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec![], &Actor::system(), None)
			.await
			.unwrap();
		assert!(entry.is_none());
		assert!(second.already_settled);
		assert_eq!(second.transactions, first.transactions);
		assert_eq!(engine.ledger.balance("rider-1").await.unwrap(), balance);
		assert_eq!(engine.ledger.history("rider-1").await.unwrap().len(), 2);
		assert_eq!(engine.state_machine.history(&order.id).await.unwrap().len(), 9);

		let err = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Pos, vec![], &Actor::system(), None)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::PaymentMethodMismatch { .. }));
	}

	#[tokio::test]
	async fn test_delivery_requires_in_transit() {
		let engine = test_engine().await;
		let order = crate::tests::order_in(&engine, OrderStatus::Ready, PaymentMethod::Cash).await;
		let err = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec![], &Actor::system(), None)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::InvalidTransition { from: OrderStatus::Ready, .. }));
	}

	#[tokio::test]
	async fn test_cash_delivery_without_rider_record_rolls_back() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		engine
			.storage
			.remove(StorageKey::Riders.as_str(), "rider-1")
			.await
			.unwrap();

		let err = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec![], &Actor::system(), None)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::RiderNotFound(ref id) if id == "rider-1"));
		let stored = engine.state_machine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::InTransit);
		assert!(engine.ledger.history("rider-1").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_digital_delivery_without_rider_record_completes() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::FixedSalary, PaymentMethod::Plin).await;
		engine
			.storage
			.remove(StorageKey::Riders.as_str(), "rider-1")
			.await
			.unwrap();

		let (result, entry) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Plin, vec![], &Actor::system(), None)
			.await
			.unwrap();
		assert!(entry.is_some());
		assert!(result.transactions.is_empty());
		assert_eq!(result.rider_id.as_deref(), Some("rider-1"));
		let stored = engine.state_machine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Delivered);

		let (replayed, _) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Plin, vec![], &Actor::system(), None)
			.await
			.unwrap();
		assert!(replayed.already_settled);
	}

	#[tokio::test]
	async fn test_ledger_timeout_is_retried_then_surfaces_as_retryable() {
		let faults = Faults::new("credit_accounts:", || StorageError::Timeout("retrieve".into()));
		let engine = flaky_engine(test_config().max_delivery_attempts(2).build(), faults.clone()).await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;
		faults.arm();

		let err = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec![], &Actor::system(), None)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Storage(StorageError::Timeout(_))), "got {err}");
		assert!(err.is_retryable());
		assert_eq!(faults.hits(), 2);
		let stored = engine.state_machine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::InTransit);
	}

	#[tokio::test]
	async fn test_fixed_salary_rider_has_no_ledger_rows() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-9", PayType::FixedSalary, PaymentMethod::Cash).await;
		let (result, _) = engine
			.delivery
			.post_delivery(&order.id, PaymentMethod::Cash, vec![], &Actor::system(), None)
			.await
			.unwrap();
		assert!(result.transactions.is_empty());
		assert_eq!(result.rider_earnings_cents, None);
	}
}
