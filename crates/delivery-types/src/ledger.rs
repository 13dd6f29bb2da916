//! Rider credit ledger types.
//!
//! The ledger is append-only: balances are projections of the transaction
//! log and corrections are new offsetting rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PaymentMethod;

/// Kind of ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
	/// Food value a rider collected in cash and now owes.
	OrderFoodDebit,
	/// Platform commission on the delivery leg of a cash order.
	OrderCommissionDebit,
	/// Top-up from the external recharge flow.
	RechargeCredit,
	/// Manual correction by an operator.
	Adjustment,
}

impl CreditTransactionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			CreditTransactionType::OrderFoodDebit => "order_food_debit",
			CreditTransactionType::OrderCommissionDebit => "order_commission_debit",
			CreditTransactionType::RechargeCredit => "recharge_credit",
			CreditTransactionType::Adjustment => "adjustment",
		}
	}
}

impl fmt::Display for CreditTransactionType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
	pub id: String,
	pub rider_id: String,
	pub transaction_type: CreditTransactionType,
	/// Signed amount; debits are negative.
	pub amount_cents: i64,
	/// Rider balance right after this row was applied.
	pub balance_after_cents: i64,
	/// Position in the rider's log, starting at 1.
	#[serde(default)]
	pub sequence: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub related_order_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
	/// Deterministic id for order-linked rows.
	///
	/// Deriving the id from `(order_id, transaction_type)` is what makes a
	/// second posting for the same pair collide instead of duplicating.
	pub fn order_linked_id(order_id: &str, transaction_type: CreditTransactionType) -> String {
		format!("{}:{}", order_id, transaction_type.as_str())
	}

	pub fn is_debit(&self) -> bool {
		self.amount_cents < 0
	}
}

/// Materialized balance projection for one rider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
	pub rider_id: String,
	pub balance_cents: i64,
	pub transaction_count: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<DateTime<Utc>>,
}

impl CreditAccount {
	pub fn empty(rider_id: impl Into<String>) -> Self {
		Self {
			rider_id: rider_id.into(),
			balance_cents: 0,
			transaction_count: 0,
			updated_at: None,
		}
	}
}

/// Reporting band for a rider's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditBand {
	Healthy,
	Low,
	Critical,
}

/// Answer to `get_credit_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
	pub rider_id: String,
	pub balance_cents: i64,
	pub status_band: CreditBand,
	pub can_receive_cash_orders: bool,
}

/// Outcome of settling a delivered order against the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
	pub order_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rider_id: Option<String>,
	pub actual_payment_method: PaymentMethod,
	/// Rows posted (or found, when the settlement already existed).
	pub transactions: Vec<CreditTransaction>,
	/// Delivery fee minus commission, for display only.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rider_earnings_cents: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub balance_after_cents: Option<i64>,
	/// True when this call found an existing settlement instead of posting.
	#[serde(default)]
	pub already_settled: bool,
}

/// Result of recomputing a balance from the full log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
	pub rider_id: String,
	pub materialized_cents: i64,
	pub ledger_cents: i64,
	pub transaction_count: u64,
}

impl Reconciliation {
	pub fn drift_cents(&self) -> i64 {
		self.materialized_cents - self.ledger_cents
	}

	pub fn is_consistent(&self) -> bool {
		self.drift_cents() == 0
	}
}
