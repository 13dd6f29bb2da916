//! Action log.
//!
//! Operator-visible actions (order creation, transitions, assignments,
//! deliveries, ledger postings) are recorded through an [`AuditSink`].
//! Recording is best effort: a failing sink is logged and never fails the
//! action itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delivery_storage::{StorageError, StorageService};
use delivery_types::{current_time, Actor, StorageKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One action log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
	pub id: String,
	pub actor: Actor,
	pub action: String,
	/// Kind of entity acted upon, e.g. "order" or "rider".
	pub entity: String,
	pub entity_id: String,
	#[serde(default)]
	pub details: serde_json::Value,
	pub at: DateTime<Utc>,
}

impl AuditEntry {
	pub fn new(
		actor: &Actor,
		action: &str,
		entity: &str,
		entity_id: &str,
		details: serde_json::Value,
	) -> Self {
		let at = current_time();
		Self {
			// Time-prefixed so a namespace scan returns entries in order.
			id: format!("{:020}-{}", at.timestamp_micros(), Uuid::new_v4()),
			actor: actor.clone(),
			action: action.to_string(),
			entity: entity.to_string(),
			entity_id: entity_id.to_string(),
			details,
			at,
		}
	}
}

#[async_trait]
pub trait AuditSink: Send + Sync {
	async fn record(&self, entry: AuditEntry) -> Result<(), StorageError>;
}

/// Writes entries to the `audit` tracing target.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
	async fn record(&self, entry: AuditEntry) -> Result<(), StorageError> {
		tracing::info!(
			target: "audit",
			actor = %entry.actor,
			action = %entry.action,
			entity = %entry.entity,
			entity_id = %entry.entity_id,
			details = %entry.details,
			"Recorded action"
		);
		Ok(())
	}
}

/// Persists entries in the audit log namespace.
pub struct StorageAuditSink {
	storage: Arc<StorageService>,
}

impl StorageAuditSink {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}
}

#[async_trait]
impl AuditSink for StorageAuditSink {
	async fn record(&self, entry: AuditEntry) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::AuditLog.as_str(), &entry.id, &entry)
			.await
	}
}

/// Optional sink with failures downgraded to warnings.
#[derive(Clone, Default)]
pub struct AuditLog {
	sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLog {
	pub fn new(sink: Option<Arc<dyn AuditSink>>) -> Self {
		Self { sink }
	}

	pub fn disabled() -> Self {
		Self { sink: None }
	}

	pub async fn record(
		&self,
		actor: &Actor,
		action: &str,
		entity: &str,
		entity_id: &str,
		details: serde_json::Value,
	) {
		let Some(sink) = &self.sink else {
			return;
		};
		let entry = AuditEntry::new(actor, action, entity, entity_id, details);
		if let Err(e) = sink.record(entry).await {
			tracing::warn!(action, entity, error = %e, "Failed to record audit entry");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::storage;
	use delivery_types::ActorKind;

	#[tokio::test]
	async fn test_storage_sink_persists_entries_in_order() {
		let storage = storage();
		let log = AuditLog::new(Some(Arc::new(StorageAuditSink::new(storage.clone()))));
		let actor = Actor::new(ActorKind::Operator, "op-1");
		log.record(&actor, "order.created", "order", "o-1", serde_json::json!({})).await;
		log.record(&actor, "order.transitioned", "order", "o-1", serde_json::json!({"to": "confirmed"}))
			.await;

		let listing = storage
			.list::<AuditEntry>(StorageKey::AuditLog.as_str(), "")
			.await
			.unwrap();
		let actions: Vec<&str> = listing.items.iter().map(|(_, e)| e.action.as_str()).collect();
		assert_eq!(actions, vec!["order.created", "order.transitioned"]);
	}

	#[tokio::test]
	async fn test_disabled_log_is_silent() {
		AuditLog::disabled()
			.record(&Actor::system(), "noop", "order", "o-1", serde_json::Value::Null)
			.await;
	}
}
