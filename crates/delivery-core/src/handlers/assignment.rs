//! Rider assignment handler.
//!
//! Picks a rider for a `ready` order and commits the pairing as one
//! compare-and-swap over both records: the rider must still be free and the
//! order must still be unassigned. Automatic selection re-ranks after losing a
//! race; a specific rider is tried exactly once.

use crate::collaborators::{AuditLog, RiderDirectory};
use crate::engine::event_bus::EventBus;
use crate::state::{OrderError, OrderStateMachine};
use chrono::{DateTime, Utc};
use delivery_ledger::CreditLedger;
use delivery_pricing::PricingEngine;
use delivery_storage::{StorageService, Versioned};
use delivery_types::{
	current_time, haversine_meters, truncate_id, Actor, Assignment, DomainEvent, GeoPoint, Order,
	OrderEvent, OrderStatus, PaymentMethod, RiderProfile, RiderSelection, StorageKey,
};
use std::sync::Arc;
use tracing::instrument;

/// A rider that may take the order, with the bytes the swap is conditioned on.
struct Candidate {
	rider: Versioned<RiderProfile>,
	distance_meters: Option<u64>,
}

impl Candidate {
	/// Closest first, then the rider idle the longest (never assigned before
	/// anyone else), then by id.
	fn rank_key(&self) -> (u64, Option<DateTime<Utc>>, &str) {
		(
			self.distance_meters.unwrap_or(u64::MAX),
			self.rider.value.last_assigned_at,
			self.rider.value.id.as_str(),
		)
	}
}

/// Handler for pairing orders with riders.
pub struct AssignmentHandler {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	riders: Arc<dyn RiderDirectory>,
	pricing: Arc<PricingEngine>,
	ledger: Arc<CreditLedger>,
	event_bus: EventBus,
	audit: AuditLog,
	max_attempts: u32,
}

impl AssignmentHandler {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		riders: Arc<dyn RiderDirectory>,
		pricing: Arc<PricingEngine>,
		ledger: Arc<CreditLedger>,
		event_bus: EventBus,
		audit: AuditLog,
		max_attempts: u32,
	) -> Self {
		Self {
			storage,
			state_machine,
			riders,
			pricing,
			ledger,
			event_bus,
			audit,
			max_attempts: max_attempts.max(1),
		}
	}

	/// Assigns a rider to a `ready` order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), selection = %selection))]
	pub async fn assign(
		&self,
		order_id: &str,
		selection: &RiderSelection,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<Assignment, OrderError> {
		let attempts = match selection {
			RiderSelection::Auto => self.max_attempts,
			RiderSelection::Specific(_) => 1,
		};

		for attempt in 1..=attempts {
			let Versioned { value: order, raw } = self.state_machine.get_versioned(order_id).await?;
			if order.status != OrderStatus::Ready {
				if attempt > 1 {
					return Err(OrderError::RiderUnavailable(format!(
						"order {} was assigned concurrently",
						order.code
					)));
				}
				self.state_machine
					.table()
					.check(order.status, OrderStatus::AssignedRider)?;
			}

			let origin = self.pricing.restaurant(&order.restaurant_id).await?.location;
			let candidates = self.candidates(&order, selection, &origin).await?;
			let Some(best) = candidates.into_iter().next() else {
				return Err(OrderError::RiderUnavailable(format!(
					"no eligible rider for order {}",
					order.code
				)));
			};

			match self.commit_assignment(order, raw, best, actor, notes.clone(), attempt).await {
				Ok(assignment) => return Ok(assignment),
				Err(OrderError::StaleState(_)) => {
					tracing::debug!(attempt, "Lost assignment race");
				},
				Err(e) => return Err(e),
			}
		}

		Err(OrderError::RiderUnavailable(format!(
			"lost the assignment race {} time(s)",
			attempts
		)))
	}

	/// Reason a rider cannot take the order, if any.
	async fn ineligibility(
		&self,
		rider: &RiderProfile,
		order: &Order,
	) -> Result<Option<String>, OrderError> {
		if rider.city_id != order.city_id {
			return Ok(Some(format!("rider {} works in another city", rider.id)));
		}
		if !rider.is_free() {
			return Ok(Some(format!("rider {} is offline or busy", rider.id)));
		}
		if order.effective_payment_method() == PaymentMethod::Cash && rider.uses_credit_ledger() {
			let balance = self.ledger.balance(&rider.id).await?;
			if !balance.can_receive_cash_orders {
				return Ok(Some(format!(
					"rider {} is below the minimum credit balance",
					rider.id
				)));
			}
		}
		Ok(None)
	}

	/// Eligible riders, best first.
	async fn candidates(
		&self,
		order: &Order,
		selection: &RiderSelection,
		origin: &GeoPoint,
	) -> Result<Vec<Candidate>, OrderError> {
		let pool = match selection {
			RiderSelection::Auto => self
				.riders
				.riders_in_city(&order.city_id)
				.await?
				.into_iter()
				.filter(|r| r.value.location.is_some())
				.collect(),
			RiderSelection::Specific(rider_id) => {
				let rider = self
					.riders
					.rider(rider_id)
					.await?
					.ok_or_else(|| OrderError::RiderNotFound(rider_id.clone()))?;
				if let Some(reason) = self.ineligibility(&rider.value, order).await? {
					return Err(OrderError::RiderUnavailable(reason));
				}
				vec![rider]
			},
		};

		let mut candidates = Vec::with_capacity(pool.len());
		for rider in pool {
			if let Some(reason) = self.ineligibility(&rider.value, order).await? {
				tracing::trace!(reason = %reason, "Skipping rider");
				continue;
			}
			let distance_meters = rider
				.value
				.location
				.map(|loc| haversine_meters(origin, &loc).round() as u64);
			candidates.push(Candidate {
				rider,
				distance_meters,
			});
		}
		candidates.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));
		Ok(candidates)
	}

	async fn commit_assignment(
		&self,
		mut order: Order,
		order_raw: Vec<u8>,
		candidate: Candidate,
		actor: &Actor,
		notes: Option<String>,
		attempt: u32,
	) -> Result<Assignment, OrderError> {
		let now = current_time();
		let Versioned {
			value: mut rider,
			raw: rider_raw,
		} = candidate.rider;

		let entry = self
			.state_machine
			.apply(&mut order, OrderStatus::AssignedRider, actor, notes, now)?;
		order.rider_id = Some(rider.id.clone());
		rider.current_order_id = Some(order.id.clone());
		rider.is_available = false;
		rider.last_assigned_at = Some(now);

		let mut tx = self.storage.transaction();
		self.state_machine.stage(&mut tx, &order, &entry, &order_raw)?;
		tx.replace(StorageKey::Riders.as_str(), &rider.id, &rider, &rider_raw)?;
		self.state_machine.commit(tx, &order.id).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			rider_id = %truncate_id(&rider.id),
			distance_meters = candidate.distance_meters,
			attempt,
			"Rider assigned"
		);
		self.event_bus
			.publish(DomainEvent::Order(OrderEvent::StatusChanged {
				order_id: order.id.clone(),
				from: entry.from_status,
				to: entry.to_status,
				actor: actor.clone(),
			}))
			.ok();
		self.event_bus
			.publish(DomainEvent::Order(OrderEvent::RiderAssigned {
				order_id: order.id.clone(),
				rider_id: rider.id.clone(),
				distance_meters: candidate.distance_meters,
			}))
			.ok();
		self.audit
			.record(
				actor,
				"order.rider_assigned",
				"order",
				&order.id,
				serde_json::json!({ "rider_id": rider.id, "attempt": attempt }),
			)
			.await;

		Ok(Assignment {
			order_id: order.id,
			rider_id: rider.id,
			distance_meters: candidate.distance_meters,
			attempts: attempt,
			history: entry,
		})
	}
}
