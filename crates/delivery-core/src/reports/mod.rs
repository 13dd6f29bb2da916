//! Settlement aggregator.
//!
//! Read-only reports over orders and the credit ledger. Reports never fail
//! because one input is unhealthy: unreadable records are skipped, a failing
//! collaborator counts as zero, and the report comes back with `degraded` set.

use crate::collaborators::{CashReportSource, RiderDirectory};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use delivery_ledger::CreditLedger;
use delivery_storage::{StorageError, StorageService};
use delivery_types::{
	current_time, truncate_id, CreditBand, CreditOverview, DailyBucket, FinancialSummary, Order,
	OrderStatus, PaymentBreakdown, PaymentMethod, ReportPeriod, StorageKey,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Builds financial and credit reports.
pub struct SettlementAggregator {
	storage: Arc<StorageService>,
	riders: Arc<dyn RiderDirectory>,
	ledger: Arc<CreditLedger>,
	cash_reports: Arc<dyn CashReportSource>,
	offset: FixedOffset,
	window_days: u32,
}

impl SettlementAggregator {
	/// `utc_offset_minutes` is the fixed offset of the operating region;
	/// out-of-range values fall back to UTC.
	pub fn new(
		storage: Arc<StorageService>,
		riders: Arc<dyn RiderDirectory>,
		ledger: Arc<CreditLedger>,
		cash_reports: Arc<dyn CashReportSource>,
		utc_offset_minutes: i32,
		window_days: u32,
	) -> Self {
		let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
		Self {
			storage,
			riders,
			ledger,
			cash_reports,
			offset,
			window_days: window_days.max(1),
		}
	}

	fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
		at.with_timezone(&self.offset).date_naive()
	}

	/// UTC instant of local midnight starting `date`.
	fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
		let seconds = i64::from(self.offset.local_minus_utc());
		(date.and_time(NaiveTime::MIN) - Duration::seconds(seconds)).and_utc()
	}

	/// First instant of `period` as seen from `now`.
	pub fn period_start(&self, period: ReportPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
		let today = self.local_date(now);
		let first_day = match period {
			ReportPeriod::Today => today,
			ReportPeriod::Week => today - Duration::days(6),
			ReportPeriod::Month => today.with_day(1).unwrap_or(today),
		};
		self.local_midnight(first_day)
	}

	/// Orders of `city_id`, and whether any could not be read.
	///
	/// A failed listing yields no orders rather than an error.
	async fn orders(&self, city_id: Option<&str>) -> (Vec<Order>, bool) {
		let listing = match self
			.storage
			.list::<Order>(StorageKey::Orders.as_str(), "")
			.await
		{
			Ok(listing) => listing,
			Err(e) => {
				tracing::warn!(error = %e, "Order listing failed; reporting without orders");
				return (Vec::new(), true);
			},
		};
		let degraded = !listing.is_complete();
		let orders = listing
			.items
			.into_iter()
			.map(|(_, order)| order)
			.filter(|order| city_id.is_none_or(|city| order.city_id == city))
			.collect();
		(orders, degraded)
	}

	/// Operational KPIs for `period`, optionally for one city.
	pub async fn financial_summary(
		&self,
		period: ReportPeriod,
		city_id: Option<&str>,
	) -> Result<FinancialSummary, StorageError> {
		self.financial_summary_at(period, city_id, current_time())
			.await
	}

	#[instrument(skip_all, fields(period = ?period, city_id = city_id.unwrap_or("*")))]
	pub async fn financial_summary_at(
		&self,
		period: ReportPeriod,
		city_id: Option<&str>,
		now: DateTime<Utc>,
	) -> Result<FinancialSummary, StorageError> {
		let (orders, mut degraded) = self.orders(city_id).await;
		let period_start = self.period_start(period, now);

		let today = self.local_date(now);
		let mut daily: BTreeMap<NaiveDate, DailyBucket> = (0..self.window_days)
			.map(|back| {
				let date = today - Duration::days(i64::from(back));
				(date, DailyBucket::empty(date))
			})
			.collect();

		let mut summary = FinancialSummary {
			period,
			city_id: city_id.map(str::to_string),
			period_start,
			generated_at: now,
			delivered_orders: 0,
			total_revenue_cents: 0,
			delivery_fees_cents: 0,
			rider_bonuses_cents: 0,
			cash_in_field_cents: 0,
			pending_validations_count: 0,
			by_payment_method: PaymentBreakdown::default(),
			daily_breakdown: Vec::new(),
			degraded: false,
		};

		for order in &orders {
			let method = order.effective_payment_method();
			if !order.status.is_terminal() && method == PaymentMethod::Cash {
				summary.cash_in_field_cents += order.total_cents;
			}
			if order.status != OrderStatus::Delivered {
				continue;
			}
			let Some(delivered_at) = order.delivered_at() else {
				tracing::warn!(order_id = %truncate_id(&order.id), "Delivered order without delivery time");
				degraded = true;
				continue;
			};
			if delivered_at > now {
				continue;
			}

			if delivered_at >= period_start {
				summary.delivered_orders += 1;
				summary.total_revenue_cents += order.total_cents;
				summary.delivery_fees_cents += order.delivery_fee_cents;
				summary.rider_bonuses_cents += order.rider_bonus_cents;
				summary.by_payment_method.bucket_mut(method).add(order.total_cents);
			}
			if let Some(bucket) = daily.get_mut(&self.local_date(delivered_at)) {
				bucket.orders += 1;
				bucket.revenue_cents += order.total_cents;
				bucket.delivery_fees_cents += order.delivery_fee_cents;
			}
		}

		summary.pending_validations_count = match self.cash_reports.pending_count(city_id).await {
			Ok(count) => count,
			Err(e) => {
				tracing::warn!(error = %e, "Cash report source failed; counting as zero");
				degraded = true;
				0
			},
		};
		summary.daily_breakdown = daily.into_values().collect();
		summary.degraded = degraded;

		tracing::debug!(
			delivered = summary.delivered_orders,
			revenue_cents = summary.total_revenue_cents,
			degraded,
			"Financial summary built"
		);
		Ok(summary)
	}

	/// Balance and band of every commission rider, lowest balance first.
	#[instrument(skip_all, fields(city_id = city_id.unwrap_or("*")))]
	pub async fn credit_overview(&self, city_id: Option<&str>) -> Result<CreditOverview, StorageError> {
		let (listing, mut degraded) = match self.riders.commission_riders(city_id).await {
			Ok(listing) => {
				let degraded = !listing.is_complete();
				(listing.items, degraded)
			},
			Err(e) => {
				tracing::warn!(error = %e, "Rider listing failed; reporting without riders");
				(Vec::new(), true)
			},
		};

		let mut riders = Vec::with_capacity(listing.len());
		for (_, rider) in &listing {
			match self.ledger.balance(&rider.id).await {
				Ok(balance) => riders.push(balance),
				Err(e) => {
					tracing::warn!(rider_id = %truncate_id(&rider.id), error = %e, "Skipping unreadable balance");
					degraded = true;
				},
			}
		}
		riders.sort_by(|a, b| {
			a.balance_cents
				.cmp(&b.balance_cents)
				.then_with(|| a.rider_id.cmp(&b.rider_id))
		});

		let count = |band: CreditBand| riders.iter().filter(|r| r.status_band == band).count() as u64;
		Ok(CreditOverview {
			city_id: city_id.map(str::to_string),
			healthy: count(CreditBand::Healthy),
			low: count(CreditBand::Low),
			critical: count(CreditBand::Critical),
			total_debt_cents: riders
				.iter()
				.filter(|r| r.balance_cents < 0)
				.map(|r| -r.balance_cents)
				.sum(),
			riders,
			degraded,
		})
	}
}
