//! Integer-cent money helpers.
//!
//! Every amount in the system is an `i64` number of cents. Operator input in
//! soles goes through `rust_decimal` and is rounded up, so no amount ever
//! passes through a binary float.

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use thiserror::Error;

/// Errors that can occur when converting money amounts.
#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
	#[error("Invalid amount '{0}'")]
	Invalid(String),
	#[error("Amount out of range: {0}")]
	OutOfRange(String),
	#[error("Exactly one of amount_cents and amount_soles is required")]
	Ambiguous,
}

/// Converts a decimal soles string to cents, rounding up.
///
/// "12.341" becomes 1235. Negative amounts round toward positive infinity as
/// well, which keeps the conversion in the platform's favour either way.
pub fn soles_to_cents(soles: &str) -> Result<i64, MoneyError> {
	let value = Decimal::from_str(soles.trim()).map_err(|_| MoneyError::Invalid(soles.into()))?;
	let cents = (value * Decimal::ONE_HUNDRED).round_dp_with_strategy(0, RoundingStrategy::ToPositiveInfinity);
	cents
		.to_i64()
		.ok_or_else(|| MoneyError::OutOfRange(soles.into()))
}

/// Picks the amount of a request that accepts either cents or soles.
pub fn resolve_amount(cents: Option<i64>, soles: Option<&str>) -> Result<i64, MoneyError> {
	match (cents, soles) {
		(Some(cents), None) => Ok(cents),
		(None, Some(soles)) => soles_to_cents(soles),
		_ => Err(MoneyError::Ambiguous),
	}
}

/// Applies a rate to an amount of cents, rounding half away from zero.
pub fn apply_rate(amount_cents: i64, rate: Decimal) -> Result<i64, MoneyError> {
	let product = Decimal::from(amount_cents)
		.checked_mul(rate)
		.ok_or_else(|| MoneyError::OutOfRange(format!("{} x {}", amount_cents, rate)))?;
	product
		.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
		.to_i64()
		.ok_or_else(|| MoneyError::OutOfRange(product.to_string()))
}
