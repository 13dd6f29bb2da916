//! Read-only settlement reports.

use axum::extract::{Json, Query, State};
use delivery_types::{
	APIError, CreditOverview, CreditOverviewQuery, FinancialSummary, FinancialSummaryQuery,
};

use super::engine_error;
use crate::server::AppState;

/// Handles GET /api/reports/financial-summary requests.
///
/// A summary assembled from incomplete data still answers 200 with
/// `degraded = true`.
pub async fn financial_summary(
	State(state): State<AppState>,
	Query(query): Query<FinancialSummaryQuery>,
) -> Result<Json<FinancialSummary>, APIError> {
	match state
		.engine
		.get_financial_summary(query.period, query.city_id.as_deref())
		.await
	{
		Ok(summary) => {
			if summary.degraded {
				tracing::warn!(period = ?query.period, "Financial summary built from incomplete data");
			}
			Ok(Json(summary))
		},
		Err(e) => {
			tracing::warn!("Financial summary failed: {}", e);
			Err(engine_error(e))
		},
	}
}

/// Handles GET /api/reports/credit-overview requests.
pub async fn credit_overview(
	State(state): State<AppState>,
	Query(query): Query<CreditOverviewQuery>,
) -> Result<Json<CreditOverview>, APIError> {
	state
		.engine
		.credit_overview(query.city_id.as_deref())
		.await
		.map(Json)
		.map_err(engine_error)
}

#[cfg(test)]
mod tests {
	use crate::server::tests::{json_body, send, test_router};
	use axum::http::StatusCode;

	#[tokio::test]
	async fn test_empty_financial_summary() {
		let router = test_router().await;
		let response = send(
			&router,
			"GET",
			"/api/reports/financial-summary?period=today&city_id=lima",
			None,
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["degraded"], false);
	}

	#[tokio::test]
	async fn test_unknown_period_is_rejected() {
		let router = test_router().await;
		let response = send(
			&router,
			"GET",
			"/api/reports/financial-summary?period=decade",
			None,
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_credit_overview_without_riders() {
		let router = test_router().await;
		let response = send(&router, "GET", "/api/reports/credit-overview", None).await;
		assert_eq!(response.status(), StatusCode::OK);
	}
}
