//! Storage-related types for the delivery core.

use std::str::FromStr;

/// Storage namespaces for the different record collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order aggregates
	Orders,
	/// Status history rows, keyed `{order_id}:{sequence}`
	OrderHistory,
	/// Rider profiles
	Riders,
	/// Restaurant reference data
	Restaurants,
	/// Credit ledger rows
	CreditTransactions,
	/// Materialized rider balances
	CreditAccounts,
	/// Rider cash reports awaiting review
	CashReports,
	/// Action log written by the storage audit sink
	AuditLog,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderHistory => "order_history",
			StorageKey::Riders => "riders",
			StorageKey::Restaurants => "restaurants",
			StorageKey::CreditTransactions => "credit_transactions",
			StorageKey::CreditAccounts => "credit_accounts",
			StorageKey::CashReports => "cash_reports",
			StorageKey::AuditLog => "audit_log",
		}
	}

	/// Whether records in this namespace may carry an expiry.
	///
	/// Orders, history and ledger rows are permanent; only the action log ages out.
	pub fn is_expirable(&self) -> bool {
		matches!(self, StorageKey::AuditLog)
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::OrderHistory,
			Self::Riders,
			Self::Restaurants,
			Self::CreditTransactions,
			Self::CreditAccounts,
			Self::CashReports,
			Self::AuditLog,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_only_audit_log_expires() {
		let expirable: Vec<_> = StorageKey::all().filter(StorageKey::is_expirable).collect();
		assert_eq!(expirable, vec![StorageKey::AuditLog]);
	}
}
