//! Storage module for the delivery core.
//!
//! This module provides abstractions for persistent storage of orders, riders
//! and ledger rows. Backends are plain key/value stores with one extra
//! capability: committing a batch of writes atomically, each write guarded by
//! a precondition on the current value. That is what the state machine and
//! the ledger build their optimistic concurrency on.

use async_trait::async_trait;
use delivery_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

mod batch;

pub use batch::{BatchOp, Expect, WriteBatch};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// A batch precondition did not hold; nothing was written.
	#[error("Precondition failed for key {0}")]
	Conflict(String),
	/// The operation did not finish within the configured bound.
	#[error("Storage operation '{0}' timed out")]
	Timeout(String),
}

impl StorageError {
	/// Conflicts and timeouts may succeed when retried with fresh reads.
	pub fn is_retryable(&self) -> bool {
		matches!(self, StorageError::Conflict(_) | StorageError::Timeout(_))
	}
}

/// Trait defining the low-level interface for storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all live keys starting with `prefix`, sorted.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Applies every operation of the batch, or none of them.
	///
	/// All preconditions are checked against the state at commit time. If any
	/// fails the backend returns `StorageError::Conflict` and leaves storage
	/// untouched.
	async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage (optional operation).
	/// Returns the number of entries removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Builds the backend key for a record.
pub fn storage_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

/// A value read together with the exact bytes it was decoded from.
///
/// Passing `raw` back as an `Expect::Equals` precondition makes a later write
/// conditional on nobody having changed the record in between.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
	pub value: T,
	pub raw: Vec<u8>,
}

/// Records of one namespace, with the entries that failed to decode.
#[derive(Debug)]
pub struct Listing<T> {
	pub items: Vec<(String, T)>,
	/// Ids whose bytes could not be read or decoded.
	pub skipped: Vec<String>,
}

impl<T> Listing<T> {
	pub fn is_complete(&self) -> bool {
		self.skipped.is_empty()
	}
}

/// High-level storage service that provides typed operations.
///
/// Values are JSON encoded. Every call is bounded by the configured
/// operation timeout.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
	operation_timeout: Duration,
}

impl StorageService {
	/// Default bound for a single backend call.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self::with_timeout(backend, Self::DEFAULT_TIMEOUT)
	}

	pub fn with_timeout(backend: Box<dyn StorageInterface>, operation_timeout: Duration) -> Self {
		Self {
			backend,
			operation_timeout,
		}
	}

	async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, StorageError>
	where
		F: Future<Output = Result<T, StorageError>>,
	{
		match tokio::time::timeout(self.operation_timeout, fut).await {
			Ok(result) => result,
			Err(_) => {
				tracing::warn!(operation = op, timeout_ms = self.operation_timeout.as_millis() as u64, "Storage operation timed out");
				Err(StorageError::Timeout(op.to_string()))
			},
		}
	}

	/// Stores a serializable value with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		let bytes = encode(data)?;
		self.bounded("store", self.backend.set_bytes(&key, bytes, ttl))
			.await
	}

	/// Stores a serializable value without time-to-live.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		Ok(self.retrieve_versioned(namespace, id).await?.value)
	}

	/// Like [`retrieve`](Self::retrieve) but maps `NotFound` to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Retrieves a value together with its raw bytes.
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let key = storage_key(namespace, id);
		let raw = self.bounded("retrieve", self.backend.get_bytes(&key)).await?;
		let value = decode(&raw)?;
		Ok(Versioned { value, raw })
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		self.bounded("remove", self.backend.delete(&key)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		let key = storage_key(namespace, id);
		self.bounded("exists", self.backend.exists(&key)).await
	}

	/// Lists the ids stored under a namespace, optionally narrowed by an id
	/// prefix.
	pub async fn list_ids(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<String>, StorageError> {
		let prefix = storage_key(namespace, id_prefix);
		let keys = self.bounded("list", self.backend.list_keys(&prefix)).await?;
		let strip = namespace.len() + 1;
		Ok(keys.into_iter().map(|k| k[strip..].to_string()).collect())
	}

	/// Reads every record under a namespace (and id prefix).
	///
	/// Records that vanish or fail to decode are reported in
	/// [`Listing::skipped`] instead of failing the whole listing.
	pub async fn list<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Listing<T>, StorageError> {
		let ids = self.list_ids(namespace, id_prefix).await?;
		let mut listing = Listing {
			items: Vec::with_capacity(ids.len()),
			skipped: Vec::new(),
		};
		for id in ids {
			match self.retrieve::<T>(namespace, &id).await {
				Ok(value) => listing.items.push((id, value)),
				Err(e) => {
					tracing::warn!(namespace, id = %id, error = %e, "Skipping unreadable record");
					listing.skipped.push(id);
				},
			}
		}
		Ok(listing)
	}

	/// Starts a batch of conditional writes.
	pub fn transaction(&self) -> Transaction {
		Transaction::default()
	}

	/// Commits a batch atomically.
	pub async fn commit(&self, tx: Transaction) -> Result<(), StorageError> {
		if tx.batch.is_empty() {
			return Ok(());
		}
		self.bounded("commit", self.backend.commit(tx.batch)).await
	}

	/// Removes expired entries from storage.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.bounded("cleanup", self.backend.cleanup_expired())
			.await
	}
}

/// Typed builder over a [`WriteBatch`].
#[derive(Debug, Default)]
pub struct Transaction {
	batch: WriteBatch,
}

impl Transaction {
	/// Creates a record that must not exist yet.
	pub fn insert<T: Serialize>(
		&mut self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<&mut Self, StorageError> {
		self.batch
			.put(storage_key(namespace, id), encode(data)?, Expect::Absent);
		Ok(self)
	}

	/// Replaces a record that must still hold exactly `expected`.
	pub fn replace<T: Serialize>(
		&mut self,
		namespace: &str,
		id: &str,
		data: &T,
		expected: &[u8],
	) -> Result<&mut Self, StorageError> {
		self.batch.put(
			storage_key(namespace, id),
			encode(data)?,
			Expect::Equals(expected.to_vec()),
		);
		Ok(self)
	}

	/// Writes a record unconditionally.
	pub fn upsert<T: Serialize>(
		&mut self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<&mut Self, StorageError> {
		self.batch
			.put(storage_key(namespace, id), encode(data)?, Expect::Any);
		Ok(self)
	}

	/// Fails the batch unless the record still holds `expected`, without
	/// writing it.
	pub fn check_unchanged(&mut self, namespace: &str, id: &str, expected: &[u8]) -> &mut Self {
		self.batch
			.check(storage_key(namespace, id), Expect::Equals(expected.to_vec()));
		self
	}

	pub fn len(&self) -> usize {
		self.batch.len()
	}

	pub fn is_empty(&self) -> bool {
		self.batch.is_empty()
	}
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
