//! Zone pricing module for the delivery core.
//!
//! This module computes delivery fees from delivery zones: the restaurant
//! determines the city, the destination determines the zone, and the zone's
//! rule turns the great-circle distance into a fee in cents. Zone data comes
//! from a pluggable [`ZoneStore`]; restaurants come from a
//! [`RestaurantLookup`].

use async_trait::async_trait;
use delivery_storage::StorageService;
use delivery_types::{
	haversine_meters, polygon_contains, truncate_id, ConfigSchema, DeliveryZone, FeeDecision,
	FeeResult, GeoPoint, ImplementationRegistry, Restaurant, StorageKey,
};
use std::cmp::Reverse;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod static_store;
}

/// Errors that can occur during pricing operations.
#[derive(Debug, Error)]
pub enum PricingError {
	/// The restaurant is unknown.
	#[error("Restaurant not found: {0}")]
	RestaurantNotFound(String),
	/// A coordinate is outside the valid latitude/longitude range.
	#[error("Invalid coordinates: {0}")]
	InvalidCoordinates(String),
	/// The zone or restaurant source failed.
	#[error("Zone store error: {0}")]
	ZoneStore(String),
	/// Error that occurs when configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Source of delivery zones.
#[async_trait]
pub trait ZoneStore: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Returns every zone defined for a city.
	async fn zones_for_city(&self, city_id: &str) -> Result<Vec<DeliveryZone>, PricingError>;
}

/// Source of restaurant reference data.
#[async_trait]
pub trait RestaurantLookup: Send + Sync {
	async fn restaurant(&self, restaurant_id: &str) -> Result<Option<Restaurant>, PricingError>;
}

#[async_trait]
impl RestaurantLookup for StorageService {
	async fn restaurant(&self, restaurant_id: &str) -> Result<Option<Restaurant>, PricingError> {
		self.retrieve_optional(StorageKey::Restaurants.as_str(), restaurant_id)
			.await
			.map_err(|e| PricingError::ZoneStore(e.to_string()))
	}
}

/// Type alias for zone store factory functions.
pub type ZoneStoreFactory = fn(&toml::Value) -> Result<Box<dyn ZoneStore>, PricingError>;

/// Registry trait for zone store implementations.
pub trait ZoneStoreRegistry: ImplementationRegistry<Factory = ZoneStoreFactory> {}

/// Get all registered zone store implementations.
pub fn get_all_implementations() -> Vec<(&'static str, ZoneStoreFactory)> {
	use implementations::static_store;

	vec![(static_store::Registry::NAME, static_store::Registry::factory())]
}

/// Fee charged by a zone for a given distance.
///
/// Every started kilometre beyond the included distance is charged in full.
pub fn fee_for_zone(zone: &DeliveryZone, distance_meters: u64) -> i64 {
	let extra_meters = distance_meters.saturating_sub(zone.included_meters);
	let extra_km = extra_meters.div_ceil(1000);
	let extra_km = i64::try_from(extra_km).unwrap_or(i64::MAX);
	zone.base_fee_cents
		.saturating_add(zone.per_km_fee_cents.saturating_mul(extra_km))
}

/// Picks the zone covering `destination`.
///
/// Overlaps are resolved by highest priority, then lowest zone id. Returns the
/// winner and how many zones matched.
pub fn select_zone<'a>(
	zones: &'a [DeliveryZone],
	destination: &GeoPoint,
) -> (Option<&'a DeliveryZone>, usize) {
	let matching: Vec<&DeliveryZone> = zones
		.iter()
		.filter(|zone| polygon_contains(&zone.polygon, destination))
		.collect();
	let count = matching.len();
	let winner = matching
		.into_iter()
		.max_by_key(|zone| (zone.priority, Reverse(zone.id.as_str())));
	(winner, count)
}

/// Computes delivery fees.
pub struct PricingEngine {
	zones: Arc<dyn ZoneStore>,
	restaurants: Arc<dyn RestaurantLookup>,
}

impl PricingEngine {
	pub fn new(zones: Arc<dyn ZoneStore>, restaurants: Arc<dyn RestaurantLookup>) -> Self {
		Self { zones, restaurants }
	}

	/// Looks up a restaurant or fails with `RestaurantNotFound`.
	pub async fn restaurant(&self, restaurant_id: &str) -> Result<Restaurant, PricingError> {
		self.restaurants
			.restaurant(restaurant_id)
			.await?
			.ok_or_else(|| PricingError::RestaurantNotFound(restaurant_id.to_string()))
	}

	/// Computes the fee for delivering from `origin` to `destination`.
	///
	/// `origin` defaults to the restaurant's location. An uncovered
	/// destination is not an error: the result has `is_covered = false` and no
	/// fee.
	pub async fn compute_fee(
		&self,
		origin: Option<GeoPoint>,
		destination: GeoPoint,
		restaurant_id: &str,
	) -> Result<FeeResult, PricingError> {
		let restaurant = self.restaurant(restaurant_id).await?;
		let origin = origin.unwrap_or(restaurant.location);
		for (label, point) in [("origin", &origin), ("destination", &destination)] {
			if !point.is_valid() {
				return Err(PricingError::InvalidCoordinates(format!(
					"{} ({}, {})",
					label, point.lat, point.lng
				)));
			}
		}

		let distance_meters = haversine_meters(&origin, &destination).ceil() as u64;
		let zones = self.zones.zones_for_city(&restaurant.city_id).await?;
		let (zone, matches) = select_zone(&zones, &destination);

		if matches > 1 {
			tracing::warn!(
				restaurant_id = %truncate_id(restaurant_id),
				city_id = %restaurant.city_id,
				matches,
				chosen = zone.map(|z| z.id.as_str()).unwrap_or_default(),
				"Destination covered by overlapping zones"
			);
		}

		let result = match zone {
			Some(zone) => FeeResult {
				restaurant_id: restaurant.id,
				city_id: restaurant.city_id,
				fee_cents: Some(fee_for_zone(zone, distance_meters)),
				zone_id: Some(zone.id.clone()),
				zone_name: Some(zone.name.clone()),
				is_covered: true,
				distance_meters,
			},
			None => {
				tracing::info!(
					restaurant_id = %truncate_id(restaurant_id),
					city_id = %restaurant.city_id,
					"Destination outside every delivery zone"
				);
				FeeResult {
					restaurant_id: restaurant.id,
					city_id: restaurant.city_id,
					fee_cents: None,
					zone_id: None,
					zone_name: None,
					is_covered: false,
					distance_meters,
				}
			},
		};
		Ok(result)
	}

	/// Records an operator fee next to the engine result.
	///
	/// A manual fee below the engine fee is logged as a loss; it is never
	/// refused.
	pub fn apply_override(&self, manual_cents: i64, result: &FeeResult) -> FeeDecision {
		let decision = FeeDecision::manual(manual_cents, result);
		if decision.is_loss() {
			tracing::warn!(
				zone_id = decision.zone_id.as_deref().unwrap_or_default(),
				calculated_cents = decision.calculated_cents.unwrap_or_default(),
				manual_cents,
				"Manual delivery fee below calculated fee"
			);
		}
		decision
	}
}
