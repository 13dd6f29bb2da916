//! Reporting types produced by the settlement aggregator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{CreditBalance, PaymentMethod};

/// Reporting period, evaluated in the operating region's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPeriod {
	/// Since local midnight.
	Today,
	/// The last seven local days including today.
	Week,
	/// Since the first day of the local month.
	Month,
}

impl FromStr for ReportPeriod {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"today" => Ok(Self::Today),
			"week" => Ok(Self::Week),
			"month" => Ok(Self::Month),
			_ => Err(format!("Unknown report period: {}", s)),
		}
	}
}

/// Count and value of orders in one payment bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBucket {
	pub orders: u64,
	pub total_cents: i64,
}

impl PaymentBucket {
	pub fn add(&mut self, total_cents: i64) {
		self.orders += 1;
		self.total_cents += total_cents;
	}
}

/// Revenue split by how the money was collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBreakdown {
	pub cash: PaymentBucket,
	pub pos: PaymentBucket,
	/// Yape and Plin together.
	pub digital: PaymentBucket,
}

impl PaymentBreakdown {
	pub fn bucket_mut(&mut self, method: PaymentMethod) -> &mut PaymentBucket {
		match method {
			PaymentMethod::Cash => &mut self.cash,
			PaymentMethod::Pos => &mut self.pos,
			PaymentMethod::Yape | PaymentMethod::Plin => &mut self.digital,
		}
	}
}

/// Delivered orders for one local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBucket {
	pub date: NaiveDate,
	pub orders: u64,
	pub revenue_cents: i64,
	pub delivery_fees_cents: i64,
}

impl DailyBucket {
	pub fn empty(date: NaiveDate) -> Self {
		Self {
			date,
			orders: 0,
			revenue_cents: 0,
			delivery_fees_cents: 0,
		}
	}
}

/// Operational KPIs for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
	pub period: ReportPeriod,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub city_id: Option<String>,
	pub period_start: DateTime<Utc>,
	pub generated_at: DateTime<Utc>,
	pub delivered_orders: u64,
	pub total_revenue_cents: i64,
	pub delivery_fees_cents: i64,
	pub rider_bonuses_cents: i64,
	/// Cash value of active orders still in riders' hands.
	pub cash_in_field_cents: i64,
	pub pending_validations_count: u64,
	pub by_payment_method: PaymentBreakdown,
	pub daily_breakdown: Vec<DailyBucket>,
	/// Set when some input could not be read and was counted as zero.
	pub degraded: bool,
}

/// Ledger health across commission riders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditOverview {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub city_id: Option<String>,
	pub riders: Vec<CreditBalance>,
	pub healthy: u64,
	pub low: u64,
	pub critical: u64,
	/// Sum of negative balances, as a positive number.
	pub total_debt_cents: i64,
	pub degraded: bool,
}

/// Status of a rider's cash report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashReportStatus {
	Pending,
	Approved,
	Rejected,
}

/// A cash report submitted by a rider for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashReport {
	pub id: String,
	pub rider_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub city_id: Option<String>,
	pub amount_cents: i64,
	pub status: CashReportStatus,
	pub submitted_at: DateTime<Utc>,
}
