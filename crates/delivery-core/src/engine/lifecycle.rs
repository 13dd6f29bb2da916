//! Lifecycle management for the delivery engine.
//!
//! Handles startup checks, the periodic storage cleanup task and shutdown.

use super::{DeliveryEngine, EngineError};
use std::time::Duration;
use tokio::task::JoinHandle;

impl DeliveryEngine {
	/// Performs any initialization required before serving requests.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(
			service_id = %self.config.service.id,
			commission_rate = %self.ledger.policy().commission_rate,
			minimum_balance_cents = self.ledger.policy().minimum_balance_cents,
			"Initializing delivery engine"
		);
		// Fails fast when the backend is unreachable.
		self.storage.exists("health", "ping").await?;
		Ok(())
	}

	/// Starts the periodic removal of expired storage entries.
	pub fn spawn_cleanup_task(&self) -> JoinHandle<()> {
		let storage = self.storage.clone();
		let period = Duration::from_secs(self.config.storage.cleanup_interval_seconds);
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					},
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					},
					_ => {},
				}
			}
		})
	}

	/// Performs cleanup operations.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!(
			subscribers = self.event_bus.subscriber_count(),
			"Shutting down delivery engine"
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::tests::test_engine;

	#[tokio::test]
	async fn test_initialize_and_shutdown() {
		let engine = test_engine().await;
		engine.initialize().await.unwrap();
		let cleanup = engine.spawn_cleanup_task();
		engine.shutdown().await.unwrap();
		cleanup.abort();
	}
}
