//! Order endpoints.
//!
//! Checkout, status transitions, rider assignment and proof of delivery. Every
//! write goes through the engine's state machine, so a rejected request leaves
//! the order exactly as it was.

use axum::extract::{Json, Path, State};
use delivery_types::{
	APIError, Actor, ActorKind, Assignment, AssignRiderRequest, CheckoutRequest, HistoryEntry,
	Order, PostDeliveryRequest, SettlementResult, TransitionRequest,
};
use tracing::warn;

use super::engine_error;
use crate::server::AppState;

/// Handles POST /api/orders requests.
///
/// The customer named in the body is the acting party.
pub async fn create_order(
	State(state): State<AppState>,
	Json(request): Json<CheckoutRequest>,
) -> Result<Json<Order>, APIError> {
	let actor = Actor::new(ActorKind::Customer, request.customer_id.clone());
	match state.engine.create_order(request, &actor).await {
		Ok(order) => Ok(Json(order)),
		Err(e) => {
			warn!("Checkout failed: {}", e);
			Err(engine_error(e))
		},
	}
}

/// Handles GET /api/orders/{id} requests.
pub async fn get_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.get_order(&id)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles GET /api/orders/{id}/history requests.
pub async fn order_history(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, APIError> {
	state
		.engine
		.order_history(&id)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles POST /api/orders/{id}/transitions requests.
pub async fn transition(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<TransitionRequest>,
) -> Result<Json<HistoryEntry>, APIError> {
	match state
		.engine
		.transition(&id, request.to, &request.actor, request.notes)
		.await
	{
		Ok(entry) => Ok(Json(entry)),
		Err(e) => {
			warn!("Transition of order {} to {} failed: {}", id, request.to, e);
			Err(engine_error(e))
		},
	}
}

/// Handles POST /api/orders/{id}/assignment requests.
pub async fn assign_rider(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<AssignRiderRequest>,
) -> Result<Json<Assignment>, APIError> {
	match state
		.engine
		.assign_rider(&id, &request.rider, &request.actor, None)
		.await
	{
		Ok(assignment) => Ok(Json(assignment)),
		Err(e) => {
			warn!("Assignment of order {} failed: {}", id, e);
			Err(engine_error(e))
		},
	}
}

/// Handles POST /api/orders/{id}/delivery requests.
///
/// Repeating the call with the same payment method returns the original
/// settlement.
pub async fn post_delivery(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<PostDeliveryRequest>,
) -> Result<Json<SettlementResult>, APIError> {
	match state
		.engine
		.post_delivery(
			&id,
			request.actual_payment_method,
			request.evidence_refs,
			&request.actor,
			None,
		)
		.await
	{
		Ok(result) => Ok(Json(result)),
		Err(e) => {
			warn!("Delivery of order {} failed: {}", id, e);
			Err(engine_error(e))
		},
	}
}

#[cfg(test)]
mod tests {
	use crate::server::tests::{json_body, send, test_router};
	use axum::http::StatusCode;
	use serde_json::json;

	fn checkout() -> serde_json::Value {
		json!({
			"customer_id": "c1",
			"restaurant_id": "r1",
			"items": [{
				"product_id": "p1",
				"name": "Lomo saltado",
				"quantity": 2,
				"unit_price_cents": 1000
			}],
			"payment_method": "cash",
			"delivery_location": { "lat": -12.115, "lng": -77.025 }
		})
	}

	#[tokio::test]
	async fn test_create_and_fetch_order() {
		let router = test_router().await;
		let response = send(&router, "POST", "/api/orders", Some(checkout())).await;
		assert_eq!(response.status(), StatusCode::OK);
		let order = json_body(response).await;
		assert_eq!(order["status"], "cart");
		assert_eq!(order["total_cents"], 2500);

		let uri = format!("/api/orders/{}", order["id"].as_str().unwrap());
		let response = send(&router, "GET", &uri, None).await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(json_body(response).await["id"], order["id"]);
	}

	#[tokio::test]
	async fn test_unknown_order_is_404() {
		let router = test_router().await;
		let response = send(&router, "GET", "/api/orders/missing", None).await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
		assert_eq!(json_body(response).await["error"], "ORDER_NOT_FOUND");
	}

	#[tokio::test]
	async fn test_illegal_transition_is_422_with_allowed_states() {
		let router = test_router().await;
		let order = json_body(send(&router, "POST", "/api/orders", Some(checkout())).await).await;
		let id = order["id"].as_str().unwrap();

		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/transitions", id),
			Some(json!({
				"to": "delivered",
				"actor": { "kind": "restaurant", "id": "r1" }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
		let body = json_body(response).await;
		assert_eq!(body["error"], "INVALID_TRANSITION");
		assert!(body["details"]["allowed"]
			.as_array()
			.unwrap()
			.contains(&json!("awaiting_confirmation")));

		let response = send(&router, "GET", &format!("/api/orders/{}", id), None).await;
		assert_eq!(json_body(response).await["status"], "cart");
	}

	#[tokio::test]
	async fn test_transition_appends_history() {
		let router = test_router().await;
		let order = json_body(send(&router, "POST", "/api/orders", Some(checkout())).await).await;
		let id = order["id"].as_str().unwrap();

		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/transitions", id),
			Some(json!({
				"to": "awaiting_confirmation",
				"actor": { "kind": "customer", "id": "c1" }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);

		let response = send(&router, "GET", &format!("/api/orders/{}/history", id), None).await;
		let history = json_body(response).await;
		assert_eq!(
			history.as_array().unwrap().last().unwrap()["to_status"],
			"awaiting_confirmation"
		);
	}

	#[tokio::test]
	async fn test_assignment_on_non_ready_order_fails() {
		let router = test_router().await;
		let order = json_body(send(&router, "POST", "/api/orders", Some(checkout())).await).await;
		let id = order["id"].as_str().unwrap();

		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/assignment", id),
			Some(json!({
				"rider": "auto",
				"actor": { "kind": "operator", "id": "op-1" }
			})),
		)
		.await;
		assert!(response.status().is_client_error());
	}

	#[tokio::test]
	async fn test_cash_delivery_settles_once() {
		let router = test_router().await;
		let order = json_body(send(&router, "POST", "/api/orders", Some(checkout())).await).await;
		let id = order["id"].as_str().unwrap().to_string();
		let transition = |to: &'static str, kind: &'static str, actor: &'static str| {
			json!({ "to": to, "actor": { "kind": kind, "id": actor } })
		};

		for to in [
			"awaiting_confirmation",
			"pending_confirmation",
			"confirmed",
			"preparing",
			"ready",
		] {
			let response = send(
				&router,
				"POST",
				&format!("/api/orders/{}/transitions", id),
				Some(transition(to, "restaurant", "r1")),
			)
			.await;
			assert_eq!(response.status(), StatusCode::OK, "transition to {}", to);
		}

		let response = send(
			&router,
			"PUT",
			"/api/riders/rd-1",
			Some(json!({
				"id": "rd-1",
				"name": "Ana",
				"city_id": "lima",
				"pay_type": "commission",
				"is_online": true,
				"is_available": true,
				"location": { "lat": -12.12, "lng": -77.03 }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);

		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/assignment", id),
			Some(json!({ "rider": "auto", "actor": { "kind": "operator", "id": "op-1" } })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);

		for to in ["picked_up", "in_transit"] {
			let response = send(
				&router,
				"POST",
				&format!("/api/orders/{}/transitions", id),
				Some(transition(to, "rider", "rd-1")),
			)
			.await;
			assert_eq!(response.status(), StatusCode::OK, "transition to {}", to);
		}

		let delivery = json!({
			"actual_payment_method": "cash",
			"evidence_refs": ["photo-1"],
			"actor": { "kind": "rider", "id": "rd-1" }
		});
		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/delivery", id),
			Some(delivery.clone()),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		let first = json_body(response).await;
		assert_eq!(first["already_settled"], false);
		// Food debit of 2000 plus 20% commission on the 500 fee.
		assert_eq!(first["balance_after_cents"], -2100);

		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/delivery", id),
			Some(delivery),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		let second = json_body(response).await;
		assert_eq!(second["already_settled"], true);
		assert_eq!(second["transactions"], first["transactions"]);

		let response = send(
			&router,
			"POST",
			&format!("/api/orders/{}/delivery", id),
			Some(json!({
				"actual_payment_method": "yape",
				"actor": { "kind": "rider", "id": "rd-1" }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::CONFLICT);
		assert_eq!(json_body(response).await["error"], "PAYMENT_METHOD_MISMATCH");
	}
}
