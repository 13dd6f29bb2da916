//! Rider endpoints: profiles, presence and the credit ledger.

use axum::extract::{Json, Path, State};
use delivery_ledger::Posting;
use delivery_types::{
	APIError, AdjustmentRequest, CreditBalance, CreditTransaction, RechargeRequest,
	Reconciliation, RiderPresence, RiderProfile,
};
use serde::Serialize;
use tracing::warn;

use super::{engine_error, money_error, RequestActor};
use crate::server::AppState;

/// Response for recharges and adjustments.
#[derive(Debug, Serialize)]
pub struct CreditPostingResponse {
	pub rider_id: String,
	pub transactions: Vec<CreditTransaction>,
	pub balance_before_cents: i64,
	pub balance_after_cents: i64,
}

impl From<Posting> for CreditPostingResponse {
	fn from(posting: Posting) -> Self {
		Self {
			rider_id: posting.rider_id,
			transactions: posting.transactions,
			balance_before_cents: posting.balance_before_cents,
			balance_after_cents: posting.balance_after_cents,
		}
	}
}

/// Handles PUT /api/riders/{id} requests.
pub async fn upsert_rider(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(mut rider): Json<RiderProfile>,
) -> Result<Json<RiderProfile>, APIError> {
	rider.id = id;
	state
		.engine
		.upsert_rider(rider)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles POST /api/riders/{id}/presence requests.
pub async fn update_presence(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(presence): Json<RiderPresence>,
) -> Result<Json<RiderProfile>, APIError> {
	state
		.engine
		.update_rider_presence(&id, &presence)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles GET /api/riders/{id}/credit requests.
pub async fn get_credit_balance(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<CreditBalance>, APIError> {
	state
		.engine
		.get_credit_balance(&id)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles GET /api/riders/{id}/credit/transactions requests.
pub async fn credit_history(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Vec<CreditTransaction>>, APIError> {
	state
		.engine
		.credit_history(&id)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles GET /api/riders/{id}/credit/reconciliation requests.
pub async fn reconcile(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Reconciliation>, APIError> {
	state
		.engine
		.reconcile(&id)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles POST /api/riders/{id}/credit/recharges requests.
pub async fn recharge(
	State(state): State<AppState>,
	Path(id): Path<String>,
	RequestActor(actor): RequestActor,
	Json(request): Json<RechargeRequest>,
) -> Result<Json<CreditPostingResponse>, APIError> {
	let amount_cents = request.amount().map_err(money_error)?;
	let reference = Some(request.reference).filter(|r| !r.trim().is_empty());
	match state
		.engine
		.recharge(&id, amount_cents, reference, &actor)
		.await
	{
		Ok(posting) => Ok(Json(posting.into())),
		Err(e) => {
			warn!("Recharge for rider {} failed: {}", id, e);
			Err(engine_error(e))
		},
	}
}

/// Handles POST /api/riders/{id}/credit/adjustments requests.
pub async fn adjust(
	State(state): State<AppState>,
	Path(id): Path<String>,
	RequestActor(actor): RequestActor,
	Json(request): Json<AdjustmentRequest>,
) -> Result<Json<CreditPostingResponse>, APIError> {
	let amount_cents = request.amount().map_err(money_error)?;
	match state
		.engine
		.adjust(&id, amount_cents, request.reason, &actor)
		.await
	{
		Ok(posting) => Ok(Json(posting.into())),
		Err(e) => {
			warn!("Adjustment for rider {} failed: {}", id, e);
			Err(engine_error(e))
		},
	}
}

#[cfg(test)]
mod tests {
	use crate::server::tests::{json_body, send, test_router};
	use axum::http::StatusCode;
	use axum::Router;
	use serde_json::json;

	async fn put_rider(router: &Router, id: &str, pay_type: &str) {
		let response = send(
			router,
			"PUT",
			&format!("/api/riders/{}", id),
			Some(json!({
				"id": id,
				"name": "Ana",
				"city_id": "lima",
				"pay_type": pay_type,
				"is_online": true,
				"is_available": true,
				"location": { "lat": -12.12, "lng": -77.03 }
			})),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn test_new_rider_starts_at_zero() {
		let router = test_router().await;
		put_rider(&router, "rd-1", "commission").await;

		let response = send(&router, "GET", "/api/riders/rd-1/credit", None).await;
		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["balance_cents"], 0);
		assert_eq!(body["can_receive_cash_orders"], true);
	}

	#[tokio::test]
	async fn test_recharge_then_history() {
		let router = test_router().await;
		put_rider(&router, "rd-2", "commission").await;

		let response = send(
			&router,
			"POST",
			"/api/riders/rd-2/credit/recharges",
			Some(json!({ "amount_cents": 3000, "reference": "yape-8812" })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["balance_before_cents"], 0);
		assert_eq!(body["balance_after_cents"], 3000);

		let response = send(&router, "GET", "/api/riders/rd-2/credit/transactions", None).await;
		let rows = json_body(response).await;
		assert_eq!(rows.as_array().unwrap().len(), 1);
		assert_eq!(rows[0]["amount_cents"], 3000);

		let response = send(&router, "GET", "/api/riders/rd-2/credit/reconciliation", None).await;
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn test_recharge_rejects_salaried_rider_and_zero_amount() {
		let router = test_router().await;
		put_rider(&router, "rd-3", "fixed_salary").await;
		put_rider(&router, "rd-4", "commission").await;

		let response = send(
			&router,
			"POST",
			"/api/riders/rd-3/credit/recharges",
			Some(json!({ "amount_cents": 1000, "reference": "x" })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);

		let response = send(
			&router,
			"POST",
			"/api/riders/rd-4/credit/recharges",
			Some(json!({ "amount_cents": 0, "reference": "x" })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_unknown_rider_credit_is_404() {
		let router = test_router().await;
		let response = send(&router, "GET", "/api/riders/ghost/credit", None).await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);

		let response = send(
			&router,
			"POST",
			"/api/riders/ghost/presence",
			Some(json!({ "is_online": false, "is_available": false })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_recharge_in_soles_rounds_up() {
		let router = test_router().await;
		put_rider(&router, "rd-6", "commission").await;

		let response = send(
			&router,
			"POST",
			"/api/riders/rd-6/credit/recharges",
			Some(json!({ "amount_soles": "12.341", "reference": "deposit" })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(json_body(response).await["balance_after_cents"], 1235);

		let response = send(
			&router,
			"POST",
			"/api/riders/rd-6/credit/recharges",
			Some(json!({ "amount_cents": 100, "amount_soles": "1.00", "reference": "x" })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
		assert_eq!(json_body(response).await["error"], "INVALID_AMOUNT");
	}

	#[tokio::test]
	async fn test_negative_adjustment() {
		let router = test_router().await;
		put_rider(&router, "rd-5", "commission").await;

		let response = send(
			&router,
			"POST",
			"/api/riders/rd-5/credit/adjustments",
			Some(json!({ "amount_cents": -700, "reason": "lost bag" })),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(json_body(response).await["balance_after_cents"], -700);
	}
}
