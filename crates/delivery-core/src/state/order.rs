//! Order state machine implementation.
//!
//! Orders move along the edges of a [`TransitionTable`]:
//! cart -> awaiting_confirmation -> pending_confirmation -> confirmed ->
//! preparing -> ready -> assigned_rider -> picked_up -> in_transit ->
//! delivered, with cancellation possible from every non-terminal state and
//! rejection only before confirmation.
//!
//! Every write is one storage batch guarded by the bytes of the order that was
//! read, so a concurrent writer makes the batch fail as a whole.

use delivery_ledger::LedgerError;
use delivery_storage::{StorageError, StorageService, Transaction, Versioned};
use delivery_types::{
	current_time, truncate_id, Actor, HistoryEntry, Order, OrderStatus, PaymentMethod, StorageKey,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while creating, transitioning or settling orders.
#[derive(Debug, Error)]
pub enum OrderError {
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Rider not found: {0}")]
	RiderNotFound(String),
	#[error("Restaurant not found: {0}")]
	RestaurantNotFound(String),
	#[error("Invalid transition from {from} to {to}")]
	InvalidTransition {
		from: OrderStatus,
		to: OrderStatus,
		allowed: Vec<OrderStatus>,
	},
	/// Another writer changed the order between read and commit.
	#[error("Order {0} was modified concurrently")]
	StaleState(String),
	#[error("Rider unavailable: {0}")]
	RiderUnavailable(String),
	#[error("Destination is outside every delivery zone of restaurant {0}")]
	ZoneUncovered(String),
	/// The ledger refused or could not read the rider's account; nothing was written.
	#[error("Ledger error: {0}")]
	Ledger(#[source] LedgerError),
	/// A delivered order whose ledger rows do not match its settlement.
	#[error("Settlement failed: {0}")]
	SettlementFailed(String),
	#[error("Order {order_id} was delivered as {recorded}, not {requested}")]
	PaymentMethodMismatch {
		order_id: String,
		recorded: PaymentMethod,
		requested: PaymentMethod,
	},
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl OrderError {
	/// Whether the same call may succeed after re-reading.
	pub fn is_retryable(&self) -> bool {
		match self {
			OrderError::StaleState(_) => true,
			OrderError::Storage(e) => e.is_retryable(),
			OrderError::Ledger(e) => e.is_retryable(),
			_ => false,
		}
	}
}

impl From<LedgerError> for OrderError {
	fn from(e: LedgerError) -> Self {
		match e {
			LedgerError::Storage(e) => OrderError::Storage(e),
			e => OrderError::Ledger(e),
		}
	}
}

/// The allowed edges between order statuses.
///
/// Built once and shared read-only by the state machine and its handlers.
#[derive(Debug, Clone)]
pub struct TransitionTable {
	edges: HashMap<OrderStatus, Vec<OrderStatus>>,
}

impl TransitionTable {
	/// The delivery lifecycle.
	pub fn standard() -> Self {
		use OrderStatus::*;
		Self::from_edges([
			(Cart, vec![AwaitingConfirmation, Cancelled]),
			(AwaitingConfirmation, vec![PendingConfirmation, Cancelled]),
			(PendingConfirmation, vec![Confirmed, Rejected, Cancelled]),
			(Confirmed, vec![Preparing, Cancelled]),
			(Rejected, vec![Cancelled]),
			(Preparing, vec![Ready, Cancelled]),
			(Ready, vec![AssignedRider, Cancelled]),
			(AssignedRider, vec![PickedUp, Cancelled]),
			(PickedUp, vec![InTransit, Cancelled]),
			(InTransit, vec![Delivered, Cancelled]),
		])
	}

	pub fn from_edges(edges: impl IntoIterator<Item = (OrderStatus, Vec<OrderStatus>)>) -> Self {
		Self {
			edges: edges.into_iter().collect(),
		}
	}

	/// Statuses reachable in one step from `from`. Empty for terminal states.
	pub fn allowed(&self, from: OrderStatus) -> &[OrderStatus] {
		self.edges.get(&from).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn permits(&self, from: OrderStatus, to: OrderStatus) -> bool {
		self.allowed(from).contains(&to)
	}

	/// Fails with `InvalidTransition` unless `from -> to` is an edge.
	pub fn check(&self, from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
		if self.permits(from, to) {
			Ok(())
		} else {
			Err(OrderError::InvalidTransition {
				from,
				to,
				allowed: self.allowed(from).to_vec(),
			})
		}
	}
}

/// Manages order persistence and status transitions.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	table: Arc<TransitionTable>,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>, table: Arc<TransitionTable>) -> Self {
		Self { storage, table }
	}

	pub fn table(&self) -> &TransitionTable {
		&self.table
	}

	/// Gets an order by ID.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
		Ok(self.get_versioned(order_id).await?.value)
	}

	/// Gets an order together with the bytes later writes are conditioned on.
	pub async fn get_versioned(&self, order_id: &str) -> Result<Versioned<Order>, OrderError> {
		self.storage
			.retrieve_versioned(StorageKey::Orders.as_str(), order_id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => OrderError::NotFound(order_id.to_string()),
				e => OrderError::Storage(e),
			})
	}

	/// Stores a new order; fails if the id is taken.
	pub async fn create(&self, order: &Order) -> Result<(), OrderError> {
		let mut tx = self.storage.transaction();
		tx.insert(StorageKey::Orders.as_str(), &order.id, order)?;
		self.commit(tx, &order.id).await
	}

	/// Status history of an order, oldest first.
	pub async fn history(&self, order_id: &str) -> Result<Vec<HistoryEntry>, OrderError> {
		// Make sure a missing order reads as NotFound rather than empty history.
		self.get_order(order_id).await?;
		let listing = self
			.storage
			.list::<HistoryEntry>(StorageKey::OrderHistory.as_str(), &format!("{}:", order_id))
			.await?;
		let mut entries: Vec<HistoryEntry> = listing.items.into_iter().map(|(_, e)| e).collect();
		entries.sort_by_key(|e| e.sequence);
		Ok(entries)
	}

	/// Moves an in-memory order along one edge and returns the history row
	/// describing the move. Nothing is written.
	pub fn apply(
		&self,
		order: &mut Order,
		to: OrderStatus,
		actor: &Actor,
		notes: Option<String>,
		at: DateTime<Utc>,
	) -> Result<HistoryEntry, OrderError> {
		self.table.check(order.status, to)?;

		let sequence = order.history_len + 1;
		let entry = HistoryEntry {
			order_id: order.id.clone(),
			sequence,
			from_status: order.status,
			to_status: to,
			actor: actor.clone(),
			notes: notes.clone(),
			at,
		};

		match to {
			OrderStatus::Rejected => order.rejection_reason = notes,
			OrderStatus::Cancelled => order.cancellation_reason = notes,
			_ => {},
		}
		order.status = to;
		order.timestamps.stamp(to, at);
		order.history_len = sequence;
		order.version += 1;
		order.updated_at = at;
		Ok(entry)
	}

	/// Adds the updated order and its new history row to `tx`, conditioned on
	/// the order still holding `expected`.
	pub fn stage(
		&self,
		tx: &mut Transaction,
		order: &Order,
		entry: &HistoryEntry,
		expected: &[u8],
	) -> Result<(), OrderError> {
		tx.replace(StorageKey::Orders.as_str(), &order.id, order, expected)?;
		tx.insert(
			StorageKey::OrderHistory.as_str(),
			&HistoryEntry::storage_id(&order.id, entry.sequence),
			entry,
		)?;
		Ok(())
	}

	/// Commits a batch touching `order_id`, reporting lost races as
	/// `StaleState`.
	pub async fn commit(&self, tx: Transaction, order_id: &str) -> Result<(), OrderError> {
		match self.storage.commit(tx).await {
			Ok(()) => Ok(()),
			Err(StorageError::Conflict(key)) => {
				tracing::debug!(order_id = %truncate_id(order_id), key = %key, "Batch precondition failed");
				Err(OrderError::StaleState(order_id.to_string()))
			},
			Err(e) => Err(e.into()),
		}
	}

	/// Transitions an order along an edge without side effects.
	pub async fn transition(
		&self,
		order_id: &str,
		to: OrderStatus,
		actor: &Actor,
		notes: Option<String>,
	) -> Result<(Order, HistoryEntry), OrderError> {
		let Versioned { value: mut order, raw } = self.get_versioned(order_id).await?;
		let entry = self.apply(&mut order, to, actor, notes, current_time())?;

		let mut tx = self.storage.transaction();
		self.stage(&mut tx, &order, &entry, &raw)?;
		self.commit(tx, order_id).await?;
		Ok((order, entry))
	}
}
