//! Rider directory.
//!
//! Rider records live in the same store as orders so that an assignment can
//! update both in one conditional batch.

use async_trait::async_trait;
use delivery_storage::{Listing, StorageError, StorageService, Versioned};
use delivery_types::{truncate_id, RiderPresence, RiderProfile, StorageKey};
use std::sync::Arc;

/// Source of rider profiles.
#[async_trait]
pub trait RiderDirectory: Send + Sync {
	/// A rider with the bytes later writes are conditioned on.
	async fn rider(&self, rider_id: &str) -> Result<Option<Versioned<RiderProfile>>, StorageError>;

	/// Every rider of a city, with the bytes later writes are conditioned on.
	async fn riders_in_city(&self, city_id: &str) -> Result<Vec<Versioned<RiderProfile>>, StorageError>;

	/// Riders on commission pay, optionally restricted to a city.
	async fn commission_riders(&self, city_id: Option<&str>) -> Result<Listing<RiderProfile>, StorageError>;

	/// Creates or replaces a rider profile.
	async fn upsert(&self, rider: &RiderProfile) -> Result<(), StorageError>;

	/// Updates the presence fields of a rider, keeping its assignment.
	async fn update_presence(
		&self,
		rider_id: &str,
		presence: &RiderPresence,
	) -> Result<RiderProfile, StorageError>;
}

const MAX_PRESENCE_ATTEMPTS: u32 = 3;

/// Rider directory backed by the storage service.
pub struct StorageRiderDirectory {
	storage: Arc<StorageService>,
}

impl StorageRiderDirectory {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}
}

#[async_trait]
impl RiderDirectory for StorageRiderDirectory {
	async fn rider(&self, rider_id: &str) -> Result<Option<Versioned<RiderProfile>>, StorageError> {
		match self
			.storage
			.retrieve_versioned(StorageKey::Riders.as_str(), rider_id)
			.await
		{
			Ok(rider) => Ok(Some(rider)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn riders_in_city(&self, city_id: &str) -> Result<Vec<Versioned<RiderProfile>>, StorageError> {
		let ids = self.storage.list_ids(StorageKey::Riders.as_str(), "").await?;
		let mut riders = Vec::new();
		for id in ids {
			match self.rider(&id).await {
				Ok(Some(rider)) if rider.value.city_id == city_id => riders.push(rider),
				Ok(_) => {},
				Err(StorageError::Serialization(e)) => {
					tracing::warn!(rider_id = %truncate_id(&id), error = %e, "Skipping unreadable rider");
				},
				Err(e) => return Err(e),
			}
		}
		Ok(riders)
	}

	async fn commission_riders(&self, city_id: Option<&str>) -> Result<Listing<RiderProfile>, StorageError> {
		let mut listing = self
			.storage
			.list::<RiderProfile>(StorageKey::Riders.as_str(), "")
			.await?;
		listing.items.retain(|(_, rider)| {
			rider.uses_credit_ledger() && city_id.is_none_or(|city| rider.city_id == city)
		});
		Ok(listing)
	}

	async fn upsert(&self, rider: &RiderProfile) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::Riders.as_str(), &rider.id, rider)
			.await
	}

	async fn update_presence(
		&self,
		rider_id: &str,
		presence: &RiderPresence,
	) -> Result<RiderProfile, StorageError> {
		let mut attempt = 0;
		loop {
			attempt += 1;
			let Versioned { value: mut rider, raw } =
				self.rider(rider_id).await?.ok_or(StorageError::NotFound)?;
			rider.is_online = presence.is_online;
			rider.is_available = presence.is_available;
			if presence.location.is_some() {
				rider.location = presence.location;
			}

			let mut tx = self.storage.transaction();
			tx.replace(StorageKey::Riders.as_str(), rider_id, &rider, &raw)?;
			match self.storage.commit(tx).await {
				Ok(()) => return Ok(rider),
				Err(e) if e.is_retryable() && attempt < MAX_PRESENCE_ATTEMPTS => continue,
				Err(e) => return Err(e),
			}
		}
	}
}
