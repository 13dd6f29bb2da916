//! Builder pattern for constructing delivery engines.
//!
//! Composes a `DeliveryEngine` from the configured storage backend and zone
//! store, chosen by name from factory maps, plus the ledger policy and audit
//! sink described in the configuration.

use crate::collaborators::{
	AuditLog, AuditSink, StorageAuditSink, StorageCashReportSource, StorageRiderDirectory,
	TracingAuditSink,
};
use crate::engine::{
	event_bus::{EventBus, DEFAULT_CAPACITY},
	DeliveryEngine, EngineParts,
};
use crate::state::{OrderStateMachine, TransitionTable};
use delivery_config::{AuditSinkKind, Config};
use delivery_ledger::{CreditLedger, LedgerPolicy};
use delivery_pricing::{PricingEngine, PricingError, RestaurantLookup, ZoneStore};
use delivery_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for the pluggable components, keyed by implementation
/// name.
pub struct EngineFactories<SF, ZF> {
	pub storage_factories: HashMap<String, SF>,
	pub zone_store_factories: HashMap<String, ZF>,
}

/// Builder for constructing a `DeliveryEngine` with pluggable implementations.
pub struct EngineBuilder {
	config: Config,
}

impl EngineBuilder {
	/// Creates a new EngineBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine using the factory registered for each primary
	/// implementation.
	pub async fn build<SF, ZF>(self, factories: EngineFactories<SF, ZF>) -> Result<DeliveryEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		ZF: Fn(&toml::Value) -> Result<Box<dyn ZoneStore>, PricingError>,
	{
		let config = self.config;

		// Storage
		let primary_storage = &config.storage.primary;
		let storage_config = config
			.storage
			.implementations
			.get(primary_storage)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary storage '{}' has no configuration",
					primary_storage
				))
			})?;
		let storage_factory = factories
			.storage_factories
			.get(primary_storage)
			.ok_or_else(|| BuilderError::MissingComponent(format!("storage '{}'", primary_storage)))?;
		let backend = storage_factory(storage_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %primary_storage,
				error = %e,
				"Failed to create storage implementation"
			);
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary_storage, e
			))
		})?;
		tracing::info!(component = "storage", implementation = %primary_storage, "Loaded");
		let storage = Arc::new(StorageService::with_timeout(
			backend,
			Duration::from_millis(config.storage.operation_timeout_ms),
		));

		// Zone store
		let zones = &config.pricing.zone_store;
		let zone_config = zones.implementations.get(&zones.primary).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary zone store '{}' has no configuration",
				zones.primary
			))
		})?;
		let zone_factory = factories
			.zone_store_factories
			.get(&zones.primary)
			.ok_or_else(|| BuilderError::MissingComponent(format!("zone store '{}'", zones.primary)))?;
		let zone_store: Arc<dyn ZoneStore> = zone_factory(zone_config)
			.map_err(|e| {
				tracing::error!(
					component = "zone_store",
					implementation = %zones.primary,
					error = %e,
					"Failed to create zone store implementation"
				);
				BuilderError::Config(format!(
					"Failed to create zone store implementation '{}': {}",
					zones.primary, e
				))
			})?
			.into();
		tracing::info!(component = "zone_store", implementation = %zones.primary, "Loaded");

		// Ledger
		let policy = LedgerPolicy::new(
			config.ledger.commission_rate,
			config.ledger.minimum_balance_cents,
			config.ledger.healthy_balance_cents,
		)
		.map_err(|e| BuilderError::Config(e.to_string()))?;
		let ledger = Arc::new(
			CreditLedger::new(storage.clone(), policy)
				.with_max_attempts(config.ledger.max_posting_attempts),
		);

		// Audit
		let audit = if config.audit.enabled {
			let sink: Arc<dyn AuditSink> = match config.audit.sink {
				AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
				AuditSinkKind::Storage => Arc::new(StorageAuditSink::new(storage.clone())),
			};
			tracing::info!(component = "audit", sink = ?config.audit.sink, "Loaded");
			AuditLog::new(Some(sink))
		} else {
			AuditLog::disabled()
		};

		let restaurants: Arc<dyn RestaurantLookup> = storage.clone();
		let pricing = Arc::new(PricingEngine::new(zone_store, restaurants));
		let state_machine = Arc::new(OrderStateMachine::new(
			storage.clone(),
			Arc::new(TransitionTable::standard()),
		));

		Ok(DeliveryEngine::new(EngineParts {
			riders: Arc::new(StorageRiderDirectory::new(storage.clone())),
			cash_reports: Arc::new(StorageCashReportSource::new(storage.clone())),
			config,
			storage,
			state_machine,
			pricing,
			ledger,
			event_bus: EventBus::new(DEFAULT_CAPACITY),
			audit,
		}))
	}
}

/// Factory maps holding every built-in implementation.
pub fn default_factories() -> EngineFactories<delivery_storage::StorageFactory, delivery_pricing::ZoneStoreFactory> {
	EngineFactories {
		storage_factories: delivery_storage::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
		zone_store_factories: delivery_pricing::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
	}
}
