//! Delivery fee quotes.

use axum::extract::{Json, State};
use delivery_types::{APIError, FeeQuoteRequest, FeeResult};

use super::engine_error;
use crate::server::AppState;

/// Handles POST /api/fees/quote requests.
///
/// An uncovered destination is a normal answer (`is_covered = false`), not an
/// error.
pub async fn quote_fee(
	State(state): State<AppState>,
	Json(request): Json<FeeQuoteRequest>,
) -> Result<Json<FeeResult>, APIError> {
	match state
		.engine
		.compute_delivery_fee(request.origin, request.destination, &request.restaurant_id)
		.await
	{
		Ok(result) => Ok(Json(result)),
		Err(e) => {
			tracing::warn!("Fee quote failed: {}", e);
			Err(engine_error(e))
		},
	}
}

#[cfg(test)]
mod tests {
	use crate::server::tests::{json_body, send, test_router};
	use axum::http::StatusCode;
	use serde_json::json;

	#[tokio::test]
	async fn test_quote_inside_zone() {
		let router = test_router().await;
		let response = send(
			&router,
			"POST",
			"/api/fees/quote",
			Some(json!({
				"destination": { "lat": -12.115, "lng": -77.025 },
				"restaurant_id": "r1"
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["is_covered"], true);
		assert_eq!(body["zone_id"], "mira");
		assert_eq!(body["fee_cents"], 500);
	}

	#[tokio::test]
	async fn test_quote_outside_every_zone_is_soft() {
		let router = test_router().await;
		let response = send(
			&router,
			"POST",
			"/api/fees/quote",
			Some(json!({
				"destination": { "lat": -12.05, "lng": -77.10 },
				"restaurant_id": "r1"
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["is_covered"], false);
		assert!(body["fee_cents"].is_null());
	}

	#[tokio::test]
	async fn test_quote_for_unknown_restaurant() {
		let router = test_router().await;
		let response = send(
			&router,
			"POST",
			"/api/fees/quote",
			Some(json!({
				"destination": { "lat": -12.115, "lng": -77.025 },
				"restaurant_id": "nope"
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}
}
