//! Rider credit ledger for the delivery core.
//!
//! Commission riders collect cash from customers and pay restaurants out of
//! pocket, so the platform tracks what each of them owes. The ledger is an
//! append-only log of [`CreditTransaction`] rows per rider with a materialized
//! [`CreditAccount`] projection that can always be rebuilt from the log.
//!
//! Settlement postings are staged into the caller's storage
//! [`Transaction`] so that a delivery, its ledger rows and the rider release
//! commit or fail together. Recharges and adjustments commit on their own.

use delivery_storage::{StorageError, StorageService, Transaction, Versioned};
use delivery_types::{
	truncate_id, current_time, CreditAccount, CreditBalance, CreditBand, CreditTransaction,
	CreditTransactionType, Order, PaymentMethod, Reconciliation, RiderProfile, SettlementResult,
	StorageKey,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod postings;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// Error that occurs when an amount is zero, negative where it must be
	/// positive, or overflows.
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	/// Error that occurs when the ledger policy is inconsistent.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// Rows of a rider could not be read, so a balance cannot be trusted.
	#[error("Ledger for rider {0} has unreadable rows")]
	Corrupted(String),
	/// Error that occurs in the underlying storage.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl LedgerError {
	/// Storage conflicts and timeouts can be retried with fresh reads.
	pub fn is_retryable(&self) -> bool {
		matches!(self, LedgerError::Storage(e) if e.is_retryable())
	}
}

/// Commission rate and balance thresholds.
///
/// Constructed once from configuration and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPolicy {
	pub commission_rate: Decimal,
	pub minimum_balance_cents: i64,
	pub healthy_balance_cents: i64,
}

impl LedgerPolicy {
	pub fn new(
		commission_rate: Decimal,
		minimum_balance_cents: i64,
		healthy_balance_cents: i64,
	) -> Result<Self, LedgerError> {
		if commission_rate < Decimal::ZERO || commission_rate > Decimal::ONE {
			return Err(LedgerError::Configuration(format!(
				"commission rate {} outside [0, 1]",
				commission_rate
			)));
		}
		if minimum_balance_cents > healthy_balance_cents {
			return Err(LedgerError::Configuration(format!(
				"minimum balance {} above healthy balance {}",
				minimum_balance_cents, healthy_balance_cents
			)));
		}
		Ok(Self {
			commission_rate,
			minimum_balance_cents,
			healthy_balance_cents,
		})
	}

	pub fn band(&self, balance_cents: i64) -> CreditBand {
		if balance_cents >= self.healthy_balance_cents {
			CreditBand::Healthy
		} else if balance_cents >= self.minimum_balance_cents {
			CreditBand::Low
		} else {
			CreditBand::Critical
		}
	}

	pub fn can_receive_cash_orders(&self, balance_cents: i64) -> bool {
		balance_cents >= self.minimum_balance_cents
	}

	pub fn balance(&self, rider_id: &str, balance_cents: i64) -> CreditBalance {
		CreditBalance {
			rider_id: rider_id.to_string(),
			balance_cents,
			status_band: self.band(balance_cents),
			can_receive_cash_orders: self.can_receive_cash_orders(balance_cents),
		}
	}
}

/// Rows appended by one ledger operation and the balance movement they
/// caused.
#[derive(Debug, Clone)]
pub struct Posting {
	pub rider_id: String,
	pub transactions: Vec<CreditTransaction>,
	pub balance_before_cents: i64,
	pub balance_after_cents: i64,
}

impl Posting {
	/// The band transition caused by this posting, if any.
	pub fn band_change(&self, policy: &LedgerPolicy) -> Option<(CreditBand, CreditBand)> {
		let before = policy.band(self.balance_before_cents);
		let after = policy.band(self.balance_after_cents);
		(before != after).then_some((before, after))
	}
}

/// Outcome of staging a delivery settlement.
#[derive(Debug, Clone)]
pub struct PreparedSettlement {
	pub result: SettlementResult,
	/// Present when new rows were staged.
	pub posting: Option<Posting>,
}

/// Attempts for recharges and adjustments that lose a race on the account,
/// unless configured otherwise.
pub const DEFAULT_POST_ATTEMPTS: u32 = 3;

/// The rider credit ledger.
pub struct CreditLedger {
	storage: Arc<StorageService>,
	policy: LedgerPolicy,
	max_attempts: u32,
}

impl CreditLedger {
	pub fn new(storage: Arc<StorageService>, policy: LedgerPolicy) -> Self {
		Self {
			storage,
			policy,
			max_attempts: DEFAULT_POST_ATTEMPTS,
		}
	}

	/// Sets how many times a recharge or adjustment is tried before a
	/// conflict or timeout is returned.
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts.max(1);
		self
	}

	pub fn policy(&self) -> &LedgerPolicy {
		&self.policy
	}

	async fn account_versioned(
		&self,
		rider_id: &str,
	) -> Result<Option<Versioned<CreditAccount>>, LedgerError> {
		match self
			.storage
			.retrieve_versioned(StorageKey::CreditAccounts.as_str(), rider_id)
			.await
		{
			Ok(account) => Ok(Some(account)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Materialized account of a rider; empty if the rider never posted.
	pub async fn account(&self, rider_id: &str) -> Result<CreditAccount, LedgerError> {
		Ok(self
			.account_versioned(rider_id)
			.await?
			.map(|v| v.value)
			.unwrap_or_else(|| CreditAccount::empty(rider_id)))
	}

	/// Current balance, band and cash eligibility of a rider.
	pub async fn balance(&self, rider_id: &str) -> Result<CreditBalance, LedgerError> {
		let account = self.account(rider_id).await?;
		Ok(self.policy.balance(rider_id, account.balance_cents))
	}

	/// Stages rows and the new projection into `tx`.
	///
	/// The projection write is conditional on the account read by the caller,
	/// which serializes postings per rider.
	fn stage(
		tx: &mut Transaction,
		current: Option<&Versioned<CreditAccount>>,
		rows: &[CreditTransaction],
		next: &CreditAccount,
	) -> Result<(), LedgerError> {
		let rows_ns = StorageKey::CreditTransactions.as_str();
		for row in rows {
			tx.insert(rows_ns, &postings::row_id(&row.rider_id, &row.id), row)?;
		}
		let accounts_ns = StorageKey::CreditAccounts.as_str();
		match current {
			Some(current) => tx.replace(accounts_ns, &next.rider_id, next, &current.raw)?,
			None => tx.insert(accounts_ns, &next.rider_id, next)?,
		};
		Ok(())
	}

	/// Rows already posted for an order.
	pub async fn settled_rows(
		&self,
		order_id: &str,
		rider_id: &str,
	) -> Result<Vec<CreditTransaction>, LedgerError> {
		let ns = StorageKey::CreditTransactions.as_str();
		let mut rows = Vec::new();
		for transaction_type in [
			CreditTransactionType::OrderFoodDebit,
			CreditTransactionType::OrderCommissionDebit,
		] {
			let id = postings::row_id(
				rider_id,
				&CreditTransaction::order_linked_id(order_id, transaction_type),
			);
			if let Some(row) = self.storage.retrieve_optional(ns, &id).await? {
				rows.push(row);
			}
		}
		Ok(rows)
	}

	/// Stages the settlement of a delivered order into `tx`.
	///
	/// Only commission riders delivering a cash order get rows: a food debit of
	/// the subtotal and a commission debit on the delivery fee. If the rows
	/// already exist they are returned unchanged with `already_settled` set and
	/// nothing is staged.
	pub async fn prepare_settlement(
		&self,
		tx: &mut Transaction,
		order: &Order,
		rider: Option<&RiderProfile>,
		method: PaymentMethod,
	) -> Result<PreparedSettlement, LedgerError> {
		let mut result = SettlementResult {
			order_id: order.id.clone(),
			rider_id: rider.map(|r| r.id.clone()),
			actual_payment_method: method,
			transactions: Vec::new(),
			rider_earnings_cents: None,
			balance_after_cents: None,
			already_settled: false,
		};
		let Some(rider) = rider.filter(|r| r.uses_credit_ledger()) else {
			return Ok(PreparedSettlement {
				result,
				posting: None,
			});
		};

		let commission = postings::commission_cents(&self.policy, order.delivery_fee_cents)?;
		result.rider_earnings_cents = Some(order.delivery_fee_cents - commission);

		if method.is_digital() {
			result.balance_after_cents = Some(self.account(&rider.id).await?.balance_cents);
			return Ok(PreparedSettlement {
				result,
				posting: None,
			});
		}

		let existing = self.settled_rows(&order.id, &rider.id).await?;
		if !existing.is_empty() {
			tracing::debug!(
				order_id = %truncate_id(&order.id),
				rider_id = %truncate_id(&rider.id),
				"Settlement rows already posted"
			);
			result.balance_after_cents = existing.last().map(|row| row.balance_after_cents);
			result.transactions = existing;
			result.already_settled = true;
			return Ok(PreparedSettlement {
				result,
				posting: None,
			});
		}

		let current = self.account_versioned(&rider.id).await?;
		let account = current
			.as_ref()
			.map(|v| v.value.clone())
			.unwrap_or_else(|| CreditAccount::empty(&rider.id));
		let (rows, next) = postings::cash_settlement(&self.policy, &account, order, current_time())?;
		Self::stage(tx, current.as_ref(), &rows, &next)?;

		result.balance_after_cents = Some(next.balance_cents);
		result.transactions = rows.clone();
		Ok(PreparedSettlement {
			result,
			posting: Some(Posting {
				rider_id: rider.id.clone(),
				transactions: rows,
				balance_before_cents: account.balance_cents,
				balance_after_cents: next.balance_cents,
			}),
		})
	}

	async fn post_single(
		&self,
		rider_id: &str,
		transaction_type: CreditTransactionType,
		amount_cents: i64,
		description: Option<String>,
	) -> Result<Posting, LedgerError> {
		let mut attempt = 0;
		loop {
			attempt += 1;
			let current = self.account_versioned(rider_id).await?;
			let account = current
				.as_ref()
				.map(|v| v.value.clone())
				.unwrap_or_else(|| CreditAccount::empty(rider_id));
			let (row, next) = postings::append(
				&account,
				Uuid::new_v4().to_string(),
				transaction_type,
				amount_cents,
				None,
				description.clone(),
				current_time(),
			)?;

			let mut tx = self.storage.transaction();
			Self::stage(&mut tx, current.as_ref(), std::slice::from_ref(&row), &next)?;
			match self.storage.commit(tx).await {
				Ok(()) => {
					tracing::info!(
						rider_id = %truncate_id(rider_id),
						transaction_type = %transaction_type,
						amount_cents,
						balance_after_cents = next.balance_cents,
						"Posted ledger row"
					);
					return Ok(Posting {
						rider_id: rider_id.to_string(),
						transactions: vec![row],
						balance_before_cents: account.balance_cents,
						balance_after_cents: next.balance_cents,
					});
				},
				Err(e) if e.is_retryable() && attempt < self.max_attempts => {
					tracing::debug!(
						rider_id = %truncate_id(rider_id),
						attempt,
						error = %e,
						"Retrying ledger posting"
					);
				},
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Credits a rider who paid money back to the platform.
	pub async fn recharge(
		&self,
		rider_id: &str,
		amount_cents: i64,
		reference: Option<String>,
	) -> Result<Posting, LedgerError> {
		if amount_cents <= 0 {
			return Err(LedgerError::InvalidAmount(format!(
				"recharge must be positive, got {}",
				amount_cents
			)));
		}
		self.post_single(
			rider_id,
			CreditTransactionType::RechargeCredit,
			amount_cents,
			reference,
		)
		.await
	}

	/// Posts a signed operator correction.
	pub async fn adjust(
		&self,
		rider_id: &str,
		amount_cents: i64,
		reason: String,
	) -> Result<Posting, LedgerError> {
		if amount_cents == 0 {
			return Err(LedgerError::InvalidAmount(
				"adjustment must not be zero".to_string(),
			));
		}
		if reason.trim().is_empty() {
			return Err(LedgerError::InvalidAmount(
				"adjustment requires a reason".to_string(),
			));
		}
		self.post_single(
			rider_id,
			CreditTransactionType::Adjustment,
			amount_cents,
			Some(reason),
		)
		.await
	}

	async fn rows(&self, rider_id: &str, strict: bool) -> Result<Vec<CreditTransaction>, LedgerError> {
		let listing = self
			.storage
			.list::<CreditTransaction>(
				StorageKey::CreditTransactions.as_str(),
				&postings::rider_prefix(rider_id),
			)
			.await?;
		if strict && !listing.is_complete() {
			return Err(LedgerError::Corrupted(rider_id.to_string()));
		}
		let mut rows: Vec<CreditTransaction> = listing
			.items
			.into_iter()
			.map(|(_, row)| row)
			.filter(|row| row.rider_id == rider_id)
			.collect();
		rows.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.created_at.cmp(&b.created_at)));
		Ok(rows)
	}

	/// A rider's rows in posting order.
	pub async fn history(&self, rider_id: &str) -> Result<Vec<CreditTransaction>, LedgerError> {
		self.rows(rider_id, false).await
	}

	/// Compares the materialized balance with the sum of the log.
	pub async fn reconcile(&self, rider_id: &str) -> Result<Reconciliation, LedgerError> {
		let rows = self.rows(rider_id, true).await?;
		let account = self.account(rider_id).await?;
		let reconciliation = Reconciliation {
			rider_id: rider_id.to_string(),
			materialized_cents: account.balance_cents,
			ledger_cents: postings::replay(&rows),
			transaction_count: rows.len() as u64,
		};
		if !reconciliation.is_consistent() {
			tracing::warn!(
				rider_id = %truncate_id(rider_id),
				drift_cents = reconciliation.drift_cents(),
				"Credit account drifted from ledger"
			);
		}
		Ok(reconciliation)
	}
}
