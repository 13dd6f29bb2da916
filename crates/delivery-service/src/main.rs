//! Main entry point for the delivery core service.
//!
//! This binary loads the configuration, assembles the delivery engine from
//! the configured storage backend and zone store, relays domain events to the
//! log, and serves the HTTP API until interrupted.

use clap::Parser;
use delivery_config::Config;
use delivery_core::{DeliveryEngine, EngineBuilder, EngineFactories};
use delivery_types::DomainEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

mod apis;
mod server;

use delivery_pricing::implementations::static_store::create_zone_store as create_static_zone_store;
use delivery_storage::implementations::file::create_storage as create_file_storage;
use delivery_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the delivery service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "DELIVERY_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the delivery service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the engine with all implementations
/// 5. Serves the API until Ctrl+C, then shuts down
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	// Create env filter with default from args
	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started delivery service");

	// Load configuration
	let config_path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Config path {:?} is not valid UTF-8", args.config))?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	// Build engine with implementations
	let engine = Arc::new(build_engine(config.clone()).await?);
	engine.initialize().await?;

	let cleanup_task = engine.spawn_cleanup_task();
	let relay_task = spawn_event_relay(&engine);

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			let shutdown = async {
				if let Err(e) = tokio::signal::ctrl_c().await {
					tracing::error!("Failed to listen for shutdown signal: {}", e);
				}
			};
			server::start_server(api_config, Arc::clone(&engine), shutdown).await?;
			tracing::info!("API server finished");
		},
		None => {
			tracing::info!("API disabled; running until interrupted");
			tokio::signal::ctrl_c().await?;
		},
	}

	relay_task.abort();
	cleanup_task.abort();
	engine.shutdown().await?;

	tracing::info!("Stopped delivery service");
	Ok(())
}

/// Forwards domain events to the log.
///
/// Notification delivery is best effort: a lagging relay skips what it missed
/// and carries on.
fn spawn_event_relay(engine: &DeliveryEngine) -> JoinHandle<()> {
	let mut events = engine.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => log_event(&event),
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Event relay lagged; notifications dropped");
				},
				Err(RecvError::Closed) => break,
			}
		}
	})
}

fn log_event(event: &DomainEvent) {
	match serde_json::to_string(event) {
		Ok(payload) => tracing::debug!(target: "delivery::events", %payload, "Domain event"),
		Err(e) => tracing::warn!("Failed to serialize domain event: {}", e),
	}
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the delivery engine with all necessary implementations.
///
/// This function wires up the concrete implementations for:
/// - Storage backends (in-memory, file)
/// - Zone stores (static zones from configuration)
async fn build_engine(config: Config) -> Result<DeliveryEngine, Box<dyn std::error::Error>> {
	let builder = EngineBuilder::new(config);

	let storage_factories = create_factory_map!(
		delivery_storage::StorageInterface,
		delivery_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let zone_store_factories = create_factory_map!(
		delivery_pricing::ZoneStore,
		delivery_pricing::PricingError,
		"static" => create_static_zone_store,
	);

	let factories = EngineFactories {
		storage_factories,
		zone_store_factories,
	};

	Ok(builder.build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use delivery_types::{PricingEvent, ReportPeriod};
	use std::io::Write;
	use tempfile::{tempdir, NamedTempFile};

	const MINIMAL: &str = r#"
[service]
id = "lima-core"

[storage]
primary = "memory"
[storage.implementations.memory]

[pricing.zone_store]
primary = "static"
[pricing.zone_store.implementations.static]

[ledger]
commission_rate = "0.20"
minimum_balance_cents = -5000
healthy_balance_cents = 0
"#;

	#[test]
	fn test_args_default_values() {
		let args = Args::parse_from(["delivery"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["delivery", "--config", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_multiple_entries() {
		let factories = create_factory_map!(
			delivery_storage::StorageInterface,
			delivery_storage::StorageError,
			"memory" => create_memory_storage,
			"file" => create_file_storage,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("memory"));
		assert!(factories.contains_key("file"));
	}

	#[tokio::test]
	async fn test_build_engine_from_file() {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(MINIMAL.as_bytes()).unwrap();
		let config = Config::from_file(file.path().to_str().unwrap())
			.await
			.unwrap();

		let engine = build_engine(config).await.unwrap();
		engine.initialize().await.unwrap();
		let summary = engine
			.get_financial_summary(ReportPeriod::Today, None)
			.await
			.unwrap();
		assert_eq!(summary.delivered_orders, 0);
	}

	#[tokio::test]
	async fn test_shipped_config_is_valid() {
		let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/delivery.toml");
		let config = Config::from_file(path).await.unwrap();
		assert_eq!(config.service.id, "lima-core");
		assert_eq!(config.storage.primary, "file");
		assert!(config.api.is_some_and(|api| api.enabled));
	}

	#[tokio::test]
	async fn test_build_engine_with_file_storage() {
		let dir = tempdir().unwrap();
		let toml = MINIMAL.replace(
			"primary = \"memory\"\n[storage.implementations.memory]",
			&format!(
				"primary = \"file\"\n[storage.implementations.file]\nstorage_path = \"{}\"",
				dir.path().display()
			),
		);
		let config: Config = toml.parse().unwrap();
		let engine = build_engine(config).await.unwrap();
		engine.initialize().await.unwrap();
	}

	#[tokio::test]
	async fn test_event_relay_consumes_events() {
		let config: Config = MINIMAL.parse().unwrap();
		let engine = build_engine(config).await.unwrap();
		let relay = spawn_event_relay(&engine);
		let delivered = engine
			.event_bus()
			.publish(DomainEvent::Pricing(PricingEvent::DestinationUncovered {
				restaurant_id: "r1".into(),
				city_id: "lima".into(),
			}))
			.unwrap();
		assert_eq!(delivered, 1);

		tokio::task::yield_now().await;
		relay.abort();
		assert!(relay.await.unwrap_err().is_cancelled());
	}
}
