//! Row construction for the credit ledger.
//!
//! Pure functions: they turn an event (a delivery, a recharge, an operator
//! correction) into ledger rows and the resulting account projection. Storage
//! is handled by [`CreditLedger`](crate::CreditLedger).

use crate::{LedgerError, LedgerPolicy};
use chrono::{DateTime, Utc};
use delivery_types::{CreditAccount, CreditTransaction, CreditTransactionType, Order};

/// Storage id of a ledger row. Rows are grouped by rider so that a rider's
/// history is a single prefix scan.
pub fn row_id(rider_id: &str, transaction_id: &str) -> String {
	format!("{}:{}", rider_id, transaction_id)
}

/// Storage prefix covering every row of a rider.
pub fn rider_prefix(rider_id: &str) -> String {
	format!("{}:", rider_id)
}

/// Appends `amount_cents` to an account, returning the row and the new
/// projection.
pub fn append(
	account: &CreditAccount,
	id: String,
	transaction_type: CreditTransactionType,
	amount_cents: i64,
	related_order_id: Option<String>,
	description: Option<String>,
	now: DateTime<Utc>,
) -> Result<(CreditTransaction, CreditAccount), LedgerError> {
	let balance_after_cents = account
		.balance_cents
		.checked_add(amount_cents)
		.ok_or_else(|| LedgerError::InvalidAmount(format!("balance overflow for {}", account.rider_id)))?;
	let sequence = account.transaction_count + 1;

	let row = CreditTransaction {
		id,
		rider_id: account.rider_id.clone(),
		transaction_type,
		amount_cents,
		balance_after_cents,
		sequence,
		related_order_id,
		description,
		created_at: now,
	};
	let next = CreditAccount {
		rider_id: account.rider_id.clone(),
		balance_cents: balance_after_cents,
		transaction_count: sequence,
		updated_at: Some(now),
	};
	Ok((row, next))
}

/// Commission retained by the platform on a delivery fee, as a positive
/// number of cents.
pub fn commission_cents(policy: &LedgerPolicy, delivery_fee_cents: i64) -> Result<i64, LedgerError> {
	delivery_types::money::apply_rate(delivery_fee_cents, policy.commission_rate)
		.map_err(|e| LedgerError::InvalidAmount(e.to_string()))
}

/// Rows posted when a commission rider delivers a cash order: the food the
/// rider owes the restaurant, then the platform commission on the delivery
/// fee. Both are debits.
pub fn cash_settlement(
	policy: &LedgerPolicy,
	account: &CreditAccount,
	order: &Order,
	now: DateTime<Utc>,
) -> Result<(Vec<CreditTransaction>, CreditAccount), LedgerError> {
	let commission = commission_cents(policy, order.delivery_fee_cents)?;

	let (food, account) = append(
		account,
		CreditTransaction::order_linked_id(&order.id, CreditTransactionType::OrderFoodDebit),
		CreditTransactionType::OrderFoodDebit,
		-order.subtotal_cents,
		Some(order.id.clone()),
		Some(format!("Food for order {}", order.code)),
		now,
	)?;
	let (fee, account) = append(
		&account,
		CreditTransaction::order_linked_id(&order.id, CreditTransactionType::OrderCommissionDebit),
		CreditTransactionType::OrderCommissionDebit,
		-commission,
		Some(order.id.clone()),
		Some(format!("Commission for order {}", order.code)),
		now,
	)?;
	Ok((vec![food, fee], account))
}

/// Rebuilds the balance from a rider's rows.
pub fn replay(rows: &[CreditTransaction]) -> i64 {
	rows.iter().map(|row| row.amount_cents).sum()
}
