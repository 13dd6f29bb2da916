//! Restaurant registration.

use axum::extract::{Json, Path, State};
use delivery_types::{APIError, Restaurant};

use super::engine_error;
use crate::server::AppState;

/// Handles PUT /api/restaurants/{id} requests.
///
/// The id in the path wins over any id in the body.
pub async fn upsert_restaurant(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(mut restaurant): Json<Restaurant>,
) -> Result<Json<Restaurant>, APIError> {
	restaurant.id = id;
	state
		.engine
		.upsert_restaurant(restaurant)
		.await
		.map(Json)
		.map_err(engine_error)
}

#[cfg(test)]
mod tests {
	use crate::server::tests::{json_body, send, test_router};
	use axum::http::StatusCode;
	use serde_json::json;

	#[tokio::test]
	async fn test_upsert_restaurant_uses_path_id() {
		let router = test_router().await;
		let response = send(
			&router,
			"PUT",
			"/api/restaurants/r2",
			Some(json!({
				"id": "ignored",
				"city_id": "lima",
				"name": "Pardos",
				"location": { "lat": -12.121, "lng": -77.031 }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(json_body(response).await["id"], "r2");
	}

	#[tokio::test]
	async fn test_invalid_location_is_rejected() {
		let router = test_router().await;
		let response = send(
			&router,
			"PUT",
			"/api/restaurants/r3",
			Some(json!({
				"id": "r3",
				"city_id": "lima",
				"name": "Nowhere",
				"location": { "lat": 120.0, "lng": -77.0 }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}
}
