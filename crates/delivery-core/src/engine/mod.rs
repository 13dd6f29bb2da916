//! Delivery engine facade.
//!
//! This module contains the `DeliveryEngine` struct which wires the state
//! machine, pricing engine, credit ledger, handlers and reports together and
//! exposes the operations callers use. The HTTP layer talks to nothing else.

pub mod event_bus;
pub mod lifecycle;

use crate::collaborators::{AuditLog, RiderDirectory};
use crate::handlers::{AssignmentHandler, CheckoutHandler, DeliveryHandler, OrderHandler};
use crate::reports::SettlementAggregator;
use crate::state::{OrderError, OrderStateMachine};
use delivery_config::Config;
use delivery_ledger::{CreditLedger, LedgerError, Posting};
use delivery_pricing::{PricingEngine, PricingError};
use delivery_storage::{StorageError, StorageService};
use delivery_types::{
	truncate_id, Actor, Assignment, CheckoutRequest, CreditBalance, CreditOverview,
	CreditTransaction, DomainEvent, FeeResult, FinancialSummary, GeoPoint, HistoryEntry,
	LedgerEvent, Order, OrderStatus, PaymentMethod, PricingEvent, Reconciliation, ReportPeriod,
	Restaurant, RiderPresence, RiderProfile, RiderSelection, SettlementResult, StorageKey,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	Order(#[from] OrderError),
	#[error(transparent)]
	Ledger(#[from] LedgerError),
	#[error(transparent)]
	Pricing(#[from] PricingError),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("{0} not found")]
	NotFound(String),
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Configuration error: {0}")]
	Config(String),
}

impl EngineError {
	/// Whether retrying the same call may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			EngineError::Order(e) => e.is_retryable(),
			EngineError::Ledger(e) => e.is_retryable(),
			EngineError::Storage(e) => e.is_retryable(),
			_ => false,
		}
	}
}

/// Main engine that owns every component of the delivery core.
#[derive(Clone)]
pub struct DeliveryEngine {
	/// Service configuration.
	pub(crate) config: Config,
	/// Storage service shared by all components.
	pub(crate) storage: Arc<StorageService>,
	/// Order state machine.
	pub(crate) state_machine: Arc<OrderStateMachine>,
	/// Zone pricing engine.
	pub(crate) pricing: Arc<PricingEngine>,
	/// Rider credit ledger.
	pub(crate) ledger: Arc<CreditLedger>,
	/// Rider directory.
	pub(crate) riders: Arc<dyn RiderDirectory>,
	/// Event bus for domain events.
	pub(crate) event_bus: event_bus::EventBus,
	/// Action log.
	pub(crate) audit: AuditLog,
	/// Generic transition handler
	pub(crate) orders: Arc<OrderHandler>,
	/// Checkout handler
	pub(crate) checkout: Arc<CheckoutHandler>,
	/// Assignment handler
	pub(crate) assignment: Arc<AssignmentHandler>,
	/// Delivery handler
	pub(crate) delivery: Arc<DeliveryHandler>,
	/// Settlement aggregator
	pub(crate) reports: Arc<SettlementAggregator>,
}

/// Components the engine is assembled from.
pub struct EngineParts {
	pub config: Config,
	pub storage: Arc<StorageService>,
	pub state_machine: Arc<OrderStateMachine>,
	pub pricing: Arc<PricingEngine>,
	pub ledger: Arc<CreditLedger>,
	pub riders: Arc<dyn RiderDirectory>,
	pub cash_reports: Arc<dyn crate::collaborators::CashReportSource>,
	pub event_bus: event_bus::EventBus,
	pub audit: AuditLog,
}

impl DeliveryEngine {
	/// Creates the engine and its handlers from already built components.
	pub fn new(parts: EngineParts) -> Self {
		let EngineParts {
			config,
			storage,
			state_machine,
			pricing,
			ledger,
			riders,
			cash_reports,
			event_bus,
			audit,
		} = parts;

		let checkout = Arc::new(CheckoutHandler::new(
			pricing.clone(),
			state_machine.clone(),
			event_bus.clone(),
			audit.clone(),
		));

		let assignment = Arc::new(AssignmentHandler::new(
			storage.clone(),
			state_machine.clone(),
			riders.clone(),
			pricing.clone(),
			ledger.clone(),
			event_bus.clone(),
			audit.clone(),
			config.dispatch.max_assignment_attempts,
		));

		let delivery = Arc::new(DeliveryHandler::new(
			storage.clone(),
			state_machine.clone(),
			riders.clone(),
			ledger.clone(),
			event_bus.clone(),
			audit.clone(),
			config.dispatch.max_delivery_attempts,
		));

		let orders = Arc::new(OrderHandler::new(
			storage.clone(),
			state_machine.clone(),
			riders.clone(),
			assignment.clone(),
			delivery.clone(),
			event_bus.clone(),
			audit.clone(),
		));

		let reports = Arc::new(SettlementAggregator::new(
			storage.clone(),
			riders.clone(),
			ledger.clone(),
			cash_reports,
			config.service.utc_offset_minutes,
			config.service.report_window_days,
		));

		Self {
			config,
			storage,
			state_machine,
			pricing,
			ledger,
			riders,
			event_bus,
			audit,
			orders,
			checkout,
			assignment,
			delivery,
			reports,
		}
	}

	/// Validates a checkout request and stores the resulting order.
	pub async fn create_order(
		&self,
		request: CheckoutRequest,
		actor: &Actor,
	) -> Result<Order, EngineError> {
		Ok(self.checkout.create_order(request, actor).await?)
	}

	pub async fn get_order(&self, order_id: &str) -> Result<Order, EngineError> {
		Ok(self.state_machine.get_order(order_id).await?)
	}

	/// Status history of an order, oldest first.
	pub async fn order_history(&self, order_id: &str) -> Result<Vec<HistoryEntry>, EngineError> {
		Ok(self.state_machine.history(order_id).await?)
	}

	/// Moves an order along one edge of the transition table.
	pub async fn transition(
		&self,
		order_id: &str,
		to: OrderStatus,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<HistoryEntry, EngineError> {
		Ok(self.orders.transition(order_id, to, actor, notes).await?)
	}

	/// Assigns a rider to a `ready` order.
	pub async fn assign_rider(
		&self,
		order_id: &str,
		selection: &RiderSelection,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<Assignment, EngineError> {
		Ok(self
			.assignment
			.assign(order_id, selection, actor, notes)
			.await?)
	}

	/// Quotes a delivery fee without creating anything.
	pub async fn compute_delivery_fee(
		&self,
		origin: Option<GeoPoint>,
		destination: GeoPoint,
		restaurant_id: &str,
	) -> Result<FeeResult, EngineError> {
		let result = self
			.pricing
			.compute_fee(origin, destination, restaurant_id)
			.await?;
		if !result.is_covered {
			self.event_bus
				.publish(DomainEvent::Pricing(PricingEvent::DestinationUncovered {
					restaurant_id: result.restaurant_id.clone(),
					city_id: result.city_id.clone(),
				}))
				.ok();
		}
		Ok(result)
	}

	/// Delivers an in-transit order and settles it against the ledger.
	pub async fn post_delivery(
		&self,
		order_id: &str,
		method: PaymentMethod,
		evidence_refs: Vec<String>,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<SettlementResult, EngineError> {
		let (result, _) = self
			.delivery
			.post_delivery(order_id, method, evidence_refs, actor, notes)
			.await?;
		Ok(result)
	}

	async fn require_rider(&self, rider_id: &str) -> Result<RiderProfile, EngineError> {
		self.riders
			.rider(rider_id)
			.await?
			.map(|r| r.value)
			.ok_or_else(|| EngineError::NotFound(format!("Rider {}", rider_id)))
	}

	/// Balance, band and cash eligibility of a rider.
	pub async fn get_credit_balance(&self, rider_id: &str) -> Result<CreditBalance, EngineError> {
		self.require_rider(rider_id).await?;
		Ok(self.ledger.balance(rider_id).await?)
	}

	pub async fn credit_history(&self, rider_id: &str) -> Result<Vec<CreditTransaction>, EngineError> {
		self.require_rider(rider_id).await?;
		Ok(self.ledger.history(rider_id).await?)
	}

	/// Credits money a rider paid back to the platform.
	pub async fn recharge(
		&self,
		rider_id: &str,
		amount_cents: i64,
		reference: Option<String>,
		actor: &Actor,
	) -> Result<Posting, EngineError> {
		let rider = self.require_rider(rider_id).await?;
		if !rider.uses_credit_ledger() {
			return Err(EngineError::Validation(format!(
				"rider {} is not on commission pay",
				rider_id
			)));
		}
		let posting = self
			.ledger
			.recharge(rider_id, amount_cents, reference)
			.await?;
		self.announce_posting(&posting, "credit.recharged", actor)
			.await;
		Ok(posting)
	}

	/// Posts a signed operator correction.
	pub async fn adjust(
		&self,
		rider_id: &str,
		amount_cents: i64,
		reason: String,
		actor: &Actor,
	) -> Result<Posting, EngineError> {
		self.require_rider(rider_id).await?;
		let posting = self.ledger.adjust(rider_id, amount_cents, reason).await?;
		self.announce_posting(&posting, "credit.adjusted", actor)
			.await;
		Ok(posting)
	}

	/// Recomputes a rider's balance from the full log.
	pub async fn reconcile(&self, rider_id: &str) -> Result<Reconciliation, EngineError> {
		Ok(self.ledger.reconcile(rider_id).await?)
	}

	async fn announce_posting(&self, posting: &Posting, action: &str, actor: &Actor) {
		tracing::info!(
			rider_id = %truncate_id(&posting.rider_id),
			before_cents = posting.balance_before_cents,
			after_cents = posting.balance_after_cents,
			action,
			"Credit posted"
		);
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
		self.audit
			.record(
				actor,
				action,
				"rider",
				&posting.rider_id,
				serde_json::json!({
					"amount_cents": posting.balance_after_cents - posting.balance_before_cents,
					"balance_after_cents": posting.balance_after_cents,
				}),
			)
			.await;
	}

	/// Ledger health across commission riders.
	pub async fn credit_overview(&self, city_id: Option<&str>) -> Result<CreditOverview, EngineError> {
		Ok(self.reports.credit_overview(city_id).await?)
	}

	/// Operational KPIs for a period.
	pub async fn get_financial_summary(
		&self,
		period: ReportPeriod,
		city_id: Option<&str>,
	) -> Result<FinancialSummary, EngineError> {
		Ok(self.reports.financial_summary(period, city_id).await?)
	}

	/// Creates or replaces a rider profile.
	///
	/// Assignment fields are owned by the engine: an existing rider keeps its
	/// current order no matter what the caller sends.
	pub async fn upsert_rider(&self, mut rider: RiderProfile) -> Result<RiderProfile, EngineError> {
		if rider.id.trim().is_empty() || rider.city_id.trim().is_empty() {
			return Err(EngineError::Validation(
				"rider id and city are required".into(),
			));
		}
		if rider.location.is_some_and(|l| !l.is_valid()) {
			return Err(EngineError::Validation("rider location is invalid".into()));
		}
		match self.riders.rider(&rider.id).await? {
			Some(existing) => {
				rider.current_order_id = existing.value.current_order_id;
				rider.last_assigned_at = existing.value.last_assigned_at;
			},
			None => rider.current_order_id = None,
		}
		self.riders.upsert(&rider).await?;
		tracing::info!(rider_id = %truncate_id(&rider.id), city_id = %rider.city_id, "Rider saved");
		Ok(rider)
	}

	/// Updates a rider's online, availability and location fields.
	pub async fn update_rider_presence(
		&self,
		rider_id: &str,
		presence: &RiderPresence,
	) -> Result<RiderProfile, EngineError> {
		if presence.location.is_some_and(|l| !l.is_valid()) {
			return Err(EngineError::Validation("rider location is invalid".into()));
		}
		self.riders
			.update_presence(rider_id, presence)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => EngineError::NotFound(format!("Rider {}", rider_id)),
				e => e.into(),
			})
	}

	/// Creates or replaces a restaurant.
	pub async fn upsert_restaurant(&self, restaurant: Restaurant) -> Result<Restaurant, EngineError> {
		if restaurant.id.trim().is_empty() || restaurant.city_id.trim().is_empty() {
			return Err(EngineError::Validation(
				"restaurant id and city are required".into(),
			));
		}
		if !restaurant.location.is_valid() {
			return Err(EngineError::Validation(
				"restaurant location is invalid".into(),
			));
		}
		self.storage
			.store(StorageKey::Restaurants.as_str(), &restaurant.id, &restaurant)
			.await?;
		Ok(restaurant)
	}

	/// Subscribes to domain events.
	pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
		self.event_bus.subscribe()
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::{in_transit_order, sample_rider, test_engine};
	use delivery_types::{ActorKind, CreditBand, LedgerEvent, PayType};

	fn operator() -> Actor {
		Actor::new(ActorKind::Operator, "op-1")
	}

	#[tokio::test]
	async fn test_fee_quote_reports_uncovered_destination() {
		let engine = test_engine().await;
		let mut events = engine.subscribe();

		let covered = engine
			.compute_delivery_fee(None, GeoPoint::new(-12.115, -77.025), "r1")
			.await
			.unwrap();
		assert!(covered.is_covered);
		assert_eq!(covered.fee_cents, Some(500));
		assert_eq!(covered.zone_id.as_deref(), Some("mira"));

		let uncovered = engine
			.compute_delivery_fee(None, GeoPoint::new(-12.30, -76.90), "r1")
			.await
			.unwrap();
		assert!(!uncovered.is_covered);
		assert_eq!(uncovered.fee_cents, None);
		assert!(matches!(
			events.try_recv().unwrap(),
			DomainEvent::Pricing(PricingEvent::DestinationUncovered { .. })
		));
	}

	#[tokio::test]
	async fn test_balance_requires_known_rider() {
		let engine = test_engine().await;
		assert!(matches!(
			engine.get_credit_balance("ghost").await,
			Err(EngineError::NotFound(_))
		));

		engine
			.upsert_rider(sample_rider("rider-1", PayType::Commission, -12.12, -77.03))
			.await
			.unwrap();
		let balance = engine.get_credit_balance("rider-1").await.unwrap();
		assert_eq!(balance.balance_cents, 0);
		assert_eq!(balance.status_band, CreditBand::Healthy);
		assert!(balance.can_receive_cash_orders);
	}

	#[tokio::test]
	async fn test_recharge_restores_cash_eligibility() {
		let engine = test_engine().await;
		let mut events = engine.subscribe();
		engine
			.upsert_rider(sample_rider("rider-1", PayType::Commission, -12.12, -77.03))
			.await
			.unwrap();
		engine
			.adjust("rider-1", -6_000, "missing cash report".into(), &operator())
			.await
			.unwrap();
		assert!(!engine.get_credit_balance("rider-1").await.unwrap().can_receive_cash_orders);

		engine
			.recharge("rider-1", 6_000, Some("deposit-42".into()), &operator())
			.await
			.unwrap();
		let balance = engine.get_credit_balance("rider-1").await.unwrap();
		assert_eq!(balance.balance_cents, 0);
		assert!(balance.can_receive_cash_orders);

		let mut bands = Vec::new();
		while let Ok(event) = events.try_recv() {
			if let DomainEvent::Ledger(LedgerEvent::BandChanged { to, .. }) = event {
				bands.push(to);
			}
		}
		assert_eq!(bands, vec![CreditBand::Critical, CreditBand::Healthy]);
		assert!(engine.reconcile("rider-1").await.unwrap().is_consistent());
	}

	#[tokio::test]
	async fn test_salaried_riders_cannot_recharge() {
		let engine = test_engine().await;
		engine
			.upsert_rider(sample_rider("rider-9", PayType::FixedSalary, -12.12, -77.03))
			.await
			.unwrap();
		assert!(matches!(
			engine.recharge("rider-9", 1_000, None, &operator()).await,
			Err(EngineError::Validation(_))
		));
	}

	#[tokio::test]
	async fn test_upsert_rider_keeps_assignment() {
		let engine = test_engine().await;
		let order = in_transit_order(&engine, "rider-1", PayType::Commission, PaymentMethod::Cash).await;

		let mut edited = sample_rider("rider-1", PayType::Commission, -12.12, -77.03);
		edited.name = "Renamed".into();
		let saved = engine.upsert_rider(edited).await.unwrap();
		assert_eq!(saved.current_order_id.as_deref(), Some(order.id.as_str()));

		let presence = RiderPresence {
			is_online: false,
			is_available: false,
			location: None,
		};
		let updated = engine.update_rider_presence("rider-1", &presence).await.unwrap();
		assert!(!updated.is_online);
		assert_eq!(updated.current_order_id.as_deref(), Some(order.id.as_str()));
		assert!(matches!(
			engine.update_rider_presence("ghost", &presence).await,
			Err(EngineError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_retryable_classification() {
		assert!(EngineError::from(OrderError::StaleState("o".into())).is_retryable());
		assert!(EngineError::from(StorageError::Timeout("commit".into())).is_retryable());
		assert!(!EngineError::NotFound("o".into()).is_retryable());
		assert!(!EngineError::from(OrderError::RiderUnavailable("o".into())).is_retryable());
	}
}
