//! Zone store backed by the configuration file.
//!
//! Zones are read once at startup from
//! `[[pricing.zone_store.implementations.static.zones]]` entries. Suitable
//! for a single region whose zones change only with a deploy.

use crate::{PricingError, ZoneStore, ZoneStoreFactory, ZoneStoreRegistry};
use async_trait::async_trait;
use delivery_types::{
	ConfigSchema, DeliveryZone, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
struct StaticZoneConfig {
	#[serde(default)]
	zones: Vec<DeliveryZone>,
}

/// Zones held in memory, grouped by city.
pub struct StaticZoneStore {
	by_city: HashMap<String, Vec<DeliveryZone>>,
}

impl StaticZoneStore {
	pub fn new(zones: Vec<DeliveryZone>) -> Self {
		let mut by_city: HashMap<String, Vec<DeliveryZone>> = HashMap::new();
		for zone in zones {
			by_city.entry(zone.city_id.clone()).or_default().push(zone);
		}
		Self { by_city }
	}

	pub fn zone_count(&self) -> usize {
		self.by_city.values().map(Vec::len).sum()
	}
}

#[async_trait]
impl ZoneStore for StaticZoneStore {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(StaticZoneStoreSchema)
	}

	async fn zones_for_city(&self, city_id: &str) -> Result<Vec<DeliveryZone>, PricingError> {
		Ok(self.by_city.get(city_id).cloned().unwrap_or_default())
	}
}

/// Configuration schema for StaticZoneStore.
pub struct StaticZoneStoreSchema;

impl StaticZoneStoreSchema {
	fn point() -> FieldType {
		FieldType::Table(Schema::new(
			vec![
				Field::new(
					"lat",
					FieldType::Float {
						min: Some(-90.0),
						max: Some(90.0),
					},
				),
				Field::new(
					"lng",
					FieldType::Float {
						min: Some(-180.0),
						max: Some(180.0),
					},
				),
			],
			vec![],
		))
	}

	fn zone() -> FieldType {
		let non_negative = || FieldType::Integer {
			min: Some(0),
			max: None,
		};
		FieldType::Table(Schema::new(
			vec![
				Field::new("id", FieldType::String),
				Field::new("city_id", FieldType::String),
				Field::new("name", FieldType::String),
				Field::new("polygon", FieldType::Array(Box::new(Self::point()))).with_validator(
					|value| match value.as_array() {
						Some(points) if points.len() >= 3 => Ok(()),
						_ => Err("a polygon needs at least 3 vertices".to_string()),
					},
				),
				Field::new("base_fee_cents", non_negative()),
			],
			vec![
				Field::new("included_meters", non_negative()),
				Field::new("per_km_fee_cents", non_negative()),
				Field::new(
					"priority",
					FieldType::Integer {
						min: None,
						max: None,
					},
				),
			],
		))
	}
}

impl ConfigSchema for StaticZoneStoreSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![Field::new("zones", FieldType::Array(Box::new(Self::zone())))],
		)
		.validate(config)
	}
}

/// Factory function to create a static zone store from configuration.
pub fn create_zone_store(config: &toml::Value) -> Result<Box<dyn ZoneStore>, PricingError> {
	StaticZoneStoreSchema
		.validate(config)
		.map_err(|e| PricingError::Configuration(e.to_string()))?;
	let parsed: StaticZoneConfig = config
		.clone()
		.try_into()
		.map_err(|e| PricingError::Configuration(format!("Invalid static zone config: {}", e)))?;

	let store = StaticZoneStore::new(parsed.zones);
	tracing::debug!(zones = store.zone_count(), "Loaded static delivery zones");
	Ok(Box::new(store))
}

/// Registry for the static zone store implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "static";
	type Factory = ZoneStoreFactory;

	fn factory() -> Self::Factory {
		create_zone_store
	}
}

impl ZoneStoreRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	const CONFIG: &str = r#"
[[zones]]
id = "mira"
city_id = "lima"
name = "Miraflores"
base_fee_cents = 500
included_meters = 2000
per_km_fee_cents = 150
polygon = [
  { lat = -12.13, lng = -77.04 },
  { lat = -12.13, lng = -77.02 },
  { lat = -12.11, lng = -77.02 },
]

[[zones]]
id = "cusco-centro"
city_id = "cusco"
name = "Centro"
base_fee_cents = 400
polygon = [
  { lat = -13.52, lng = -71.98 },
  { lat = -13.52, lng = -71.96 },
  { lat = -13.50, lng = -71.97 },
]
"#;

	#[tokio::test]
	async fn test_factory_groups_zones_by_city() {
		let config: toml::Value = toml::from_str(CONFIG).unwrap();
		let store = create_zone_store(&config).unwrap();
		let lima = store.zones_for_city("lima").await.unwrap();
		assert_eq!(lima.len(), 1);
		assert_eq!(lima[0].per_km_fee_cents, 150);
		let cusco = store.zones_for_city("cusco").await.unwrap();
		assert_eq!(cusco[0].included_meters, 0);
		assert!(store.zones_for_city("arequipa").await.unwrap().is_empty());
	}

	#[test]
	fn test_degenerate_polygon_rejected() {
		let config: toml::Value = toml::from_str(
			r#"
[[zones]]
id = "z"
city_id = "lima"
name = "Line"
base_fee_cents = 500
polygon = [{ lat = 0.0, lng = 0.0 }, { lat = 1.0, lng = 1.0 }]
"#,
		)
		.unwrap();
		let err = create_zone_store(&config).err().unwrap();
		assert!(err.to_string().contains("3 vertices"));
	}

	#[test]
	fn test_empty_config_is_valid() {
		let config = toml::Value::Table(toml::Table::new());
		assert!(create_zone_store(&config).is_ok());
	}
}
