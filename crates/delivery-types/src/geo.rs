//! Geographic helpers.
//!
//! Coordinates are plain WGS84 degrees. Floating point is fine here: distances
//! feed fee rules and rider ranking, they never hold money.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
	pub lat: f64,
	pub lng: f64,
}

impl GeoPoint {
	pub fn new(lat: f64, lng: f64) -> Self {
		Self { lat, lng }
	}

	/// Whether both coordinates are finite and within their valid ranges.
	pub fn is_valid(&self) -> bool {
		self.lat.is_finite()
			&& self.lng.is_finite()
			&& (-90.0..=90.0).contains(&self.lat)
			&& (-180.0..=180.0).contains(&self.lng)
	}
}

/// Great-circle distance between two points using the haversine formula.
pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
	let lat1 = a.lat.to_radians();
	let lat2 = b.lat.to_radians();
	let d_lat = (b.lat - a.lat).to_radians();
	let d_lng = (b.lng - a.lng).to_radians();

	let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
	2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Point-in-polygon test using ray casting.
///
/// The polygon is given as its vertices in order; closing the ring is
/// optional. Polygons with fewer than three vertices cover nothing.
pub fn polygon_contains(polygon: &[GeoPoint], point: &GeoPoint) -> bool {
	if polygon.len() < 3 {
		return false;
	}

	let mut inside = false;
	let mut j = polygon.len() - 1;
	for i in 0..polygon.len() {
		let (pi, pj) = (&polygon[i], &polygon[j]);
		if (pi.lat > point.lat) != (pj.lat > point.lat) {
			let crossing_lng =
				(pj.lng - pi.lng) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng;
			if point.lng < crossing_lng {
				inside = !inside;
			}
		}
		j = i;
	}
	inside
}

#[cfg(test)]
mod tests {
	use super::*;

	fn square() -> Vec<GeoPoint> {
		vec![
			GeoPoint::new(-12.10, -77.05),
			GeoPoint::new(-12.10, -77.00),
			GeoPoint::new(-12.05, -77.00),
			GeoPoint::new(-12.05, -77.05),
		]
	}

	#[test]
	fn test_haversine_known_distance() {
		// One degree of latitude is roughly 111.2 km.
		let d = haversine_meters(&GeoPoint::new(0.0, 0.0), &GeoPoint::new(1.0, 0.0));
		assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
	}

	#[test]
	fn test_haversine_zero_for_same_point() {
		let p = GeoPoint::new(-12.0464, -77.0428);
		assert_eq!(haversine_meters(&p, &p), 0.0);
	}

	#[test]
	fn test_polygon_contains_inside_and_outside() {
		let poly = square();
		assert!(polygon_contains(&poly, &GeoPoint::new(-12.07, -77.02)));
		assert!(!polygon_contains(&poly, &GeoPoint::new(-12.20, -77.02)));
		assert!(!polygon_contains(&poly, &GeoPoint::new(-12.07, -76.90)));
	}

	#[test]
	fn test_degenerate_polygon_covers_nothing() {
		let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
		assert!(!polygon_contains(&line, &GeoPoint::new(0.5, 0.5)));
	}

	#[test]
	fn test_point_validity() {
		assert!(GeoPoint::new(-12.0, -77.0).is_valid());
		assert!(!GeoPoint::new(95.0, 0.0).is_valid());
		assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
	}
}
