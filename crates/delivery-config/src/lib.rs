//! Configuration module for the delivery core.
//!
//! This module provides the configuration structures for the service and
//! utilities for loading them from TOML files. Values of the form `${VAR}` or
//! `${VAR:-default}` are resolved from the environment before parsing, and the
//! result is validated so that a running engine never sees an incomplete
//! configuration.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

#[cfg(any(test, feature = "testing"))]
pub mod builders;

#[cfg(any(test, feature = "testing"))]
pub use builders::config::ConfigBuilder;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the full error embeds the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the delivery core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Service identity and regional settings.
	pub service: ServiceConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for delivery fee pricing.
	pub pricing: PricingConfig,
	/// Rider credit ledger policy. Every value is required.
	pub ledger: LedgerConfig,
	/// Rider assignment settings.
	#[serde(default)]
	pub dispatch: DispatchConfig,
	/// Action log settings.
	#[serde(default)]
	pub audit: AuditConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Service identity and regional settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this service instance.
	pub id: String,
	/// Fixed UTC offset of the operating region, used for local-day reports.
	/// Defaults to -300 (UTC-5).
	#[serde(default = "default_utc_offset_minutes")]
	pub utc_offset_minutes: i32,
	/// Number of local days in the financial summary's daily breakdown.
	#[serde(default = "default_report_window_days")]
	pub report_window_days: u32,
}

fn default_utc_offset_minutes() -> i32 {
	-300
}

fn default_report_window_days() -> u32 {
	7
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Upper bound for a single storage operation, in milliseconds.
	#[serde(default = "default_operation_timeout_ms")]
	pub operation_timeout_ms: u64,
	/// Interval in seconds for cleaning up expired storage entries.
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
}

fn default_operation_timeout_ms() -> u64 {
	5_000
}

fn default_cleanup_interval_seconds() -> u64 {
	3600
}

/// Configuration for delivery fee pricing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
	/// Source of delivery zones.
	pub zone_store: ZoneStoreConfig,
}

/// Selects the zone store implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZoneStoreConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of zone store implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Rider credit ledger policy.
///
/// The money fields have no defaults: a wrong commission rate silently moves
/// money, so the operator has to state it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
	/// Fraction of the delivery fee charged on cash orders, e.g. "0.20".
	pub commission_rate: Decimal,
	/// Below this balance a commission rider receives no cash orders.
	pub minimum_balance_cents: i64,
	/// At or above this balance a rider is reported as healthy.
	pub healthy_balance_cents: i64,
	/// Attempts for a recharge or adjustment that loses a race on the account.
	#[serde(default = "default_max_attempts")]
	pub max_posting_attempts: u32,
}

/// Rider assignment and delivery settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
	/// How many times automatic assignment re-ranks after losing a race.
	#[serde(default = "default_max_attempts")]
	pub max_assignment_attempts: u32,
	/// How many times a delivery is retried after contention or a storage timeout.
	#[serde(default = "default_max_attempts")]
	pub max_delivery_attempts: u32,
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			max_assignment_attempts: default_max_attempts(),
			max_delivery_attempts: default_max_attempts(),
		}
	}
}

fn default_max_attempts() -> u32 {
	3
}

/// Where action log entries go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
	/// Structured log lines only.
	#[default]
	Tracing,
	/// Persisted to the `audit_log` storage namespace.
	Storage,
}

/// Action log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default)]
	pub sink: AuditSinkKind,
}

impl Default for AuditConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			sink: AuditSinkKind::default(),
		}
	}
}

fn default_true() -> bool {
	true
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	/// CORS configuration.
	pub cors: Option<CorsConfig>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	/// Allowed origins for CORS.
	pub allowed_origins: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024 // 1MB
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match (std::env::var(var_name.as_str()), default_value) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)));
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}
		if !(-720..=840).contains(&self.service.utc_offset_minutes) {
			return Err(ConfigError::Validation(format!(
				"utc_offset_minutes {} is outside -720..=840",
				self.service.utc_offset_minutes
			)));
		}
		if self.service.report_window_days == 0 || self.service.report_window_days > 31 {
			return Err(ConfigError::Validation(
				"report_window_days must be between 1 and 31".into(),
			));
		}

		// Storage
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.operation_timeout_ms == 0 || self.storage.operation_timeout_ms > 60_000 {
			return Err(ConfigError::Validation(
				"Storage operation_timeout_ms must be between 1 and 60000".into(),
			));
		}
		if self.storage.cleanup_interval_seconds == 0
			|| self.storage.cleanup_interval_seconds > 86400
		{
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be between 1 and 86400".into(),
			));
		}

		// Pricing
		let zones = &self.pricing.zone_store;
		if !zones.implementations.contains_key(&zones.primary) {
			return Err(ConfigError::Validation(format!(
				"Primary zone store '{}' not found in implementations",
				zones.primary
			)));
		}

		// Ledger
		if self.ledger.commission_rate.is_sign_negative()
			|| self.ledger.commission_rate > Decimal::ONE
		{
			return Err(ConfigError::Validation(format!(
				"commission_rate {} must be between 0 and 1",
				self.ledger.commission_rate
			)));
		}
		if self.ledger.minimum_balance_cents > self.ledger.healthy_balance_cents {
			return Err(ConfigError::Validation(format!(
				"minimum_balance_cents ({}) cannot exceed healthy_balance_cents ({})",
				self.ledger.minimum_balance_cents, self.ledger.healthy_balance_cents
			)));
		}

		// Retry budgets
		for (name, attempts) in [
			("ledger.max_posting_attempts", self.ledger.max_posting_attempts),
			("dispatch.max_assignment_attempts", self.dispatch.max_assignment_attempts),
			("dispatch.max_delivery_attempts", self.dispatch.max_delivery_attempts),
		] {
			if !(1..=10).contains(&attempts) {
				return Err(ConfigError::Validation(format!(
					"{} must be between 1 and 10",
					name
				)));
			}
		}

		if let Some(api) = &self.api {
			if api.enabled && api.port == 0 {
				return Err(ConfigError::Validation("API port cannot be 0".into()));
			}
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the
/// result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
