//! File-based storage backend.
//!
//! Each key is one file: a 64-byte header carrying the expiry, followed by
//! the value. Writes go to a temp file that is renamed into place.
//!
//! Batch commits are serialized twice: by an in-process mutex and by an
//! advisory `fs2` lock on `.lock`, so two processes sharing a directory do not
//! interleave. Before a batch is applied it is written to `.journal`; a
//! journal left behind by a crash is replayed when the storage is opened.

use crate::{BatchOp, StorageError, StorageInterface, WriteBatch};
use async_trait::async_trait;
use delivery_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;

const LOCK_FILE: &str = ".lock";
const JOURNAL_FILE: &str = ".journal";

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

/// Fixed-size file header for TTL support.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "DLVS"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"DLVS";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			unix_now().saturating_add(ttl.as_secs())
		};
		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Bad magic bytes".into()));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}
		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && unix_now() >= self.expires_at
	}
}

/// Extracts the value from file contents; `None` when expired.
fn unwrap_payload(data: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError> {
	let header = FileHeader::deserialize(&data)?;
	if header.is_expired() {
		return Ok(None);
	}
	Ok(Some(data[FileHeader::SIZE..].to_vec()))
}

fn wrap_payload(value: &[u8], ttl: Duration) -> Vec<u8> {
	let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
	file_data.extend_from_slice(&FileHeader::new(ttl).serialize());
	file_data.extend_from_slice(value);
	file_data
}

/// Maps a key to a file name that can be mapped back.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			':' => out.push_str("%3A"),
			'/' => out.push_str("%2F"),
			'\\' => out.push_str("%5C"),
			other => out.push(other),
		}
	}
	out
}

fn decode_key(name: &str) -> String {
	name.replace("%3A", ":")
		.replace("%2F", "/")
		.replace("%5C", "\\")
		.replace("%25", "%")
}

/// TTL configuration per storage namespace.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let ttls = StorageKey::all()
			.filter(StorageKey::is_expirable)
			.filter_map(|storage_key| {
				config
					.get(format!("ttl_{}", storage_key.as_str()))
					.and_then(|v| v.as_integer())
					.map(|secs| (storage_key, Duration::from_secs(secs.max(0) as u64)))
			})
			.collect();
		Self { ttls }
	}

	fn ttl_for_key(&self, key: &str) -> Duration {
		namespace_of(key)
			.and_then(|sk| self.ttls.get(&sk).copied())
			.unwrap_or(Duration::ZERO)
	}

	/// Resolves the TTL for a write, dropping any expiry on a permanent namespace.
	fn effective_ttl(&self, key: &str, requested: Option<Duration>) -> Duration {
		match namespace_of(key) {
			Some(sk) if sk.is_expirable() => requested.unwrap_or_else(|| self.ttl_for_key(key)),
			_ => Duration::ZERO,
		}
	}
}

fn namespace_of(key: &str) -> Option<StorageKey> {
	key.split(':').next().and_then(|ns| ns.parse().ok())
}

/// One write recorded in the journal before a batch is applied.
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
	key: String,
	/// `None` deletes the key.
	value: Option<Vec<u8>>,
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	commit_lock: Mutex<()>,
}

impl FileStorage {
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
			commit_lock: Mutex::new(()),
		}
	}

	/// Opens a storage directory, creating it and replaying any journal left
	/// by an interrupted commit.
	pub fn open(base_path: PathBuf, ttl_config: TtlConfig) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(|e| StorageError::Backend(e.to_string()))?;
		let storage = Self::new(base_path, ttl_config);
		storage.replay_journal()?;
		Ok(storage)
	}

	fn file_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	fn replay_journal(&self) -> Result<(), StorageError> {
		let journal_path = self.base_path.join(JOURNAL_FILE);
		let data = match std::fs::read(&journal_path) {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		let entries: Vec<JournalEntry> = serde_json::from_slice(&data)
			.map_err(|e| StorageError::Backend(format!("Corrupt journal: {}", e)))?;

		tracing::warn!(
			writes = entries.len(),
			path = %self.base_path.display(),
			"Replaying interrupted storage commit"
		);
		for entry in entries {
			let path = self.file_path(&entry.key);
			let result = match entry.value {
				Some(value) => {
					let ttl = self.ttl_config.ttl_for_key(&entry.key);
					std::fs::write(&path, wrap_payload(&value, ttl))
				},
				None => match std::fs::remove_file(&path) {
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
					other => other,
				},
			};
			result.map_err(|e| StorageError::Backend(e.to_string()))?;
		}
		std::fs::remove_file(&journal_path).map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn read_live(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(self.file_path(key)).await {
			Ok(data) => unwrap_payload(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
		match fs::remove_file(path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	/// Takes the cross-process advisory lock for the directory.
	async fn lock_directory(&self) -> Result<std::fs::File, StorageError> {
		let lock_path = self.base_path.join(LOCK_FILE);
		tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
			let file = std::fs::OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(&lock_path)?;
			file.lock_exclusive()?;
			Ok(file)
		})
		.await
		.map_err(|e| StorageError::Backend(e.to_string()))?
		.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn apply_locked(&self, batch: WriteBatch) -> Result<(), StorageError> {
		for op in batch.ops() {
			let current = self.read_live(op.key()).await?;
			if !op.expect().holds(current.as_deref()) {
				return Err(StorageError::Conflict(op.key().to_string()));
			}
		}

		let writes: Vec<JournalEntry> = batch
			.into_ops()
			.into_iter()
			.filter_map(|op| match op {
				BatchOp::Put { key, value, .. } => Some(JournalEntry {
					key,
					value: Some(value),
				}),
				BatchOp::Delete { key, .. } => Some(JournalEntry { key, value: None }),
				BatchOp::Check { .. } => None,
			})
			.collect();
		if writes.is_empty() {
			return Ok(());
		}

		let journal_path = self.base_path.join(JOURNAL_FILE);
		let journal =
			serde_json::to_vec(&writes).map_err(|e| StorageError::Serialization(e.to_string()))?;
		Self::write_atomic(&journal_path, &journal).await?;

		for entry in &writes {
			let path = self.file_path(&entry.key);
			match &entry.value {
				Some(value) => {
					let ttl = self.ttl_config.ttl_for_key(&entry.key);
					Self::write_atomic(&path, &wrap_payload(value, ttl)).await?;
				},
				None => Self::remove_if_present(&path).await?,
			}
		}

		Self::remove_if_present(&journal_path).await
	}

	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let _guard = self.commit_lock.lock().await;
		let mut removed = 0;
		let mut entries = fs::read_dir(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let Ok(data) = fs::read(&path).await else {
				tracing::debug!(path = %path.display(), "Skipping unreadable file");
				continue;
			};
			let expired = FileHeader::deserialize(&data)
				.map(|h| h.is_expired())
				.unwrap_or(false);
			if expired {
				match fs::remove_file(&path).await {
					Ok(_) => removed += 1,
					Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove expired file"),
				}
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_live(key).await?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let _guard = self.commit_lock.lock().await;
		let ttl = self.ttl_config.effective_ttl(key, ttl);
		Self::write_atomic(&self.file_path(key), &wrap_payload(&value, ttl)).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.commit_lock.lock().await;
		Self::remove_if_present(&self.file_path(key)).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_live(key).await?.is_some())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let file_name = entry.file_name();
			let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".bin")) else {
				continue;
			};
			let key = decode_key(stem);
			if key.starts_with(prefix) && self.read_live(&key).await?.is_some() {
				keys.push(key);
			}
		}
		keys.sort();
		Ok(keys)
	}

	async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
		let _guard = self.commit_lock.lock().await;
		let lock = self.lock_directory().await?;
		let result = self.apply_locked(batch).await;
		if let Err(e) = FileExt::unlock(&lock) {
			tracing::warn!(error = %e, "Failed to release storage lock");
		}
		result
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		for storage_key in StorageKey::all().filter(StorageKey::is_expirable) {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}

		// A TTL on any other namespace would let cleanup delete orders or ledger rows.
		if let Some(table) = config.as_table() {
			for key in table.keys() {
				let Some(namespace) = key.strip_prefix("ttl_") else {
					continue;
				};
				let expirable = namespace
					.parse::<StorageKey>()
					.is_ok_and(|sk| sk.is_expirable());
				if !expirable {
					return Err(ValidationError::InvalidValue {
						field: key.clone(),
						message: format!("namespace '{}' does not support expiry", namespace),
					});
				}
			}
		}

		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory (default: "./data/storage")
/// - `ttl_audit_log`: TTL in seconds for action log entries (default: 0, never).
///   No other namespace accepts a TTL.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::open(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Expect;
	use tempfile::TempDir;

	fn open(dir: &TempDir) -> FileStorage {
		FileStorage::open(dir.path().to_path_buf(), TtlConfig::default()).unwrap()
	}

	#[test]
	fn test_key_encoding_round_trips() {
		let key = "order_history:7f3a:0001/x%y";
		let encoded = encode_key(key);
		assert!(!encoded.contains(':') && !encoded.contains('/'));
		assert_eq!(decode_key(&encoded), key);
	}

	#[tokio::test]
	async fn test_set_get_list() {
		let dir = TempDir::new().unwrap();
		let storage = open(&dir);

		storage
			.set_bytes("orders:b", b"2".to_vec(), None)
			.await
			.unwrap();
		storage
			.set_bytes("orders:a", b"1".to_vec(), None)
			.await
			.unwrap();
		storage
			.set_bytes("riders:a", b"r".to_vec(), None)
			.await
			.unwrap();

		assert_eq!(storage.get_bytes("orders:a").await.unwrap(), b"1");
		assert_eq!(
			storage.list_keys("orders:").await.unwrap(),
			vec!["orders:a", "orders:b"]
		);
	}

	#[tokio::test]
	async fn test_commit_conflict_leaves_files_untouched() {
		let dir = TempDir::new().unwrap();
		let storage = open(&dir);
		storage.set_bytes("k", b"v1".to_vec(), None).await.unwrap();

		let mut batch = WriteBatch::new();
		batch
			.put("k", b"v2".to_vec(), Expect::Equals(b"other".to_vec()))
			.put("n", b"x".to_vec(), Expect::Absent);
		assert!(matches!(
			storage.commit(batch).await,
			Err(StorageError::Conflict(_))
		));
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"v1");
		assert!(!storage.exists("n").await.unwrap());
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[tokio::test]
	async fn test_expired_entries_are_invisible_and_cleaned() {
		let dir = TempDir::new().unwrap();
		let storage = open(&dir);
		let path = storage.file_path("audit_log:old");
		let mut data = wrap_payload(b"x", Duration::ZERO);
		// Expired one second after the epoch.
		data[6..14].copy_from_slice(&1u64.to_le_bytes());
		std::fs::write(&path, data).unwrap();

		assert!(!storage.exists("audit_log:old").await.unwrap());
		assert!(storage.list_keys("audit_log:").await.unwrap().is_empty());
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert!(!path.exists());
	}

	#[tokio::test]
	async fn test_journal_is_replayed_on_open() {
		let dir = TempDir::new().unwrap();
		let entries = vec![
			JournalEntry {
				key: "orders:a".into(),
				value: Some(b"{}".to_vec()),
			},
			JournalEntry {
				key: "orders:gone".into(),
				value: None,
			},
		];
		std::fs::write(
			dir.path().join("orders%3Agone.bin"),
			wrap_payload(b"old", Duration::ZERO),
		)
		.unwrap();
		std::fs::write(
			dir.path().join(JOURNAL_FILE),
			serde_json::to_vec(&entries).unwrap(),
		)
		.unwrap();

		let storage = open(&dir);
		assert_eq!(storage.get_bytes("orders:a").await.unwrap(), b"{}");
		assert!(!storage.exists("orders:gone").await.unwrap());
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[test]
	fn test_schema_rejects_negative_ttl() {
		let config: toml::Value = toml::from_str("ttl_audit_log = -1").unwrap();
		assert!(FileStorageSchema.validate(&config).is_err());
	}

	#[test]
	fn test_schema_rejects_ttl_on_permanent_namespaces() {
		for line in [
			"ttl_credit_transactions = 1",
			"ttl_credit_accounts = 1",
			"ttl_orders = 1",
			"ttl_order_history = 1",
			"ttl_unknown = 1",
		] {
			let config: toml::Value = toml::from_str(line).unwrap();
			assert!(
				matches!(
					FileStorageSchema.validate(&config),
					Err(ValidationError::InvalidValue { .. })
				),
				"{} was accepted",
				line
			);
		}

		let config: toml::Value = toml::from_str("ttl_audit_log = 3600").unwrap();
		assert!(FileStorageSchema.validate(&config).is_ok());
	}

	#[tokio::test]
	async fn test_ledger_rows_survive_cleanup() {
		let dir = TempDir::new().unwrap();
		let config: toml::Value = toml::from_str(&format!(
			"storage_path = \"{}\"\nttl_credit_transactions = 1",
			dir.path().display()
		))
		.unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));

		let mut ttls = HashMap::new();
		ttls.insert(StorageKey::AuditLog, Duration::from_secs(1));
		let storage = FileStorage::open(dir.path().to_path_buf(), TtlConfig { ttls }).unwrap();
		storage
			.set_bytes(
				"credit_transactions:rd-1:0001",
				b"{}".to_vec(),
				Some(Duration::from_secs(1)),
			)
			.await
			.unwrap();

		let data = std::fs::read(storage.file_path("credit_transactions:rd-1:0001")).unwrap();
		assert_eq!(&data[6..14], &0u64.to_le_bytes());
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
		assert!(storage.exists("credit_transactions:rd-1:0001").await.unwrap());
	}
}
