//! Configuration builder for creating test and development configurations.

use crate::{
	ApiConfig, AuditConfig, AuditSinkKind, Config, DispatchConfig, LedgerConfig, PricingConfig,
	ServiceConfig, StorageConfig, ZoneStoreConfig,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults to in-memory storage, an empty static zone store, a 20%
/// commission and thresholds of -50.00 (minimum) and 0.00 (healthy).
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	utc_offset_minutes: i32,
	report_window_days: u32,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	operation_timeout_ms: u64,
	zone_store_implementations: HashMap<String, toml::Value>,
	commission_rate: Decimal,
	minimum_balance_cents: i64,
	healthy_balance_cents: i64,
	max_assignment_attempts: u32,
	max_delivery_attempts: u32,
	max_posting_attempts: u32,
	audit_sink: AuditSinkKind,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let empty = toml::Value::Table(toml::Table::new());
		Self {
			service_id: "test-delivery".to_string(),
			utc_offset_minutes: -300,
			report_window_days: 7,
			storage_primary: "memory".to_string(),
			storage_implementations: HashMap::from([("memory".to_string(), empty.clone())]),
			operation_timeout_ms: 1_000,
			zone_store_implementations: HashMap::from([("static".to_string(), empty)]),
			commission_rate: Decimal::new(20, 2),
			minimum_balance_cents: -5_000,
			healthy_balance_cents: 0,
			max_assignment_attempts: 3,
			max_delivery_attempts: 3,
			max_posting_attempts: 3,
			audit_sink: AuditSinkKind::Tracing,
			api: None,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	pub fn utc_offset_minutes(mut self, minutes: i32) -> Self {
		self.utc_offset_minutes = minutes;
		self
	}

	pub fn report_window_days(mut self, days: u32) -> Self {
		self.report_window_days = days;
		self
	}

	/// Uses the given storage implementation as primary.
	pub fn storage(mut self, name: impl Into<String>, config: toml::Value) -> Self {
		let name = name.into();
		self.storage_implementations.insert(name.clone(), config);
		self.storage_primary = name;
		self
	}

	pub fn operation_timeout_ms(mut self, timeout: u64) -> Self {
		self.operation_timeout_ms = timeout;
		self
	}

	/// Replaces the static zone store configuration.
	pub fn static_zones(mut self, config: toml::Value) -> Self {
		self.zone_store_implementations
			.insert("static".to_string(), config);
		self
	}

	pub fn commission_rate(mut self, rate: Decimal) -> Self {
		self.commission_rate = rate;
		self
	}

	pub fn thresholds(mut self, minimum_cents: i64, healthy_cents: i64) -> Self {
		self.minimum_balance_cents = minimum_cents;
		self.healthy_balance_cents = healthy_cents;
		self
	}

	pub fn max_assignment_attempts(mut self, attempts: u32) -> Self {
		self.max_assignment_attempts = attempts;
		self
	}

	pub fn max_delivery_attempts(mut self, attempts: u32) -> Self {
		self.max_delivery_attempts = attempts;
		self
	}

	pub fn max_posting_attempts(mut self, attempts: u32) -> Self {
		self.max_posting_attempts = attempts;
		self
	}

	pub fn audit_sink(mut self, sink: AuditSinkKind) -> Self {
		self.audit_sink = sink;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	/// Builds the `Config` with the configured values.
	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
				utc_offset_minutes: self.utc_offset_minutes,
				report_window_days: self.report_window_days,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				operation_timeout_ms: self.operation_timeout_ms,
				cleanup_interval_seconds: 3600,
			},
			pricing: PricingConfig {
				zone_store: ZoneStoreConfig {
					primary: "static".to_string(),
					implementations: self.zone_store_implementations,
				},
			},
			ledger: LedgerConfig {
				commission_rate: self.commission_rate,
				minimum_balance_cents: self.minimum_balance_cents,
				healthy_balance_cents: self.healthy_balance_cents,
				max_posting_attempts: self.max_posting_attempts,
			},
			dispatch: DispatchConfig {
				max_assignment_attempts: self.max_assignment_attempts,
				max_delivery_attempts: self.max_delivery_attempts,
			},
			audit: AuditConfig {
				enabled: true,
				sink: self.audit_sink,
			},
			api: self.api,
		}
	}
}
