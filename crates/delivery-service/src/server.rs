//! HTTP server for the delivery API.
//!
//! Builds the axum router nested under `/api`, applies the CORS, tracing,
//! body-size and timeout layers from `ApiConfig`, and serves it until the
//! shutdown future resolves.

use axum::{
	extract::{DefaultBodyLimit, State},
	http::{HeaderValue, StatusCode},
	response::{IntoResponse, Json},
	routing::{get, post, put},
	Router,
};
use delivery_config::ApiConfig;
use delivery_core::DeliveryEngine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::{AllowOrigin, CorsLayer},
	timeout::TimeoutLayer,
	trace::TraceLayer,
};

use crate::apis::{fees, orders, reports, restaurants, riders};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the delivery engine for processing requests.
	pub engine: Arc<DeliveryEngine>,
}

/// Builds the API router with every route and middleware layer.
pub fn router(api_config: &ApiConfig, engine: Arc<DeliveryEngine>) -> Router {
	let api = Router::new()
		.route("/health", get(handle_health))
		.route("/orders", post(orders::create_order))
		.route("/orders/{id}", get(orders::get_order))
		.route("/orders/{id}/history", get(orders::order_history))
		.route("/orders/{id}/transitions", post(orders::transition))
		.route("/orders/{id}/assignment", post(orders::assign_rider))
		.route("/orders/{id}/delivery", post(orders::post_delivery))
		.route("/fees/quote", post(fees::quote_fee))
		.route("/riders/{id}", put(riders::upsert_rider))
		.route("/riders/{id}/presence", post(riders::update_presence))
		.route("/riders/{id}/credit", get(riders::get_credit_balance))
		.route(
			"/riders/{id}/credit/transactions",
			get(riders::credit_history),
		)
		.route("/riders/{id}/credit/recharges", post(riders::recharge))
		.route("/riders/{id}/credit/adjustments", post(riders::adjust))
		.route(
			"/riders/{id}/credit/reconciliation",
			get(riders::reconcile),
		)
		.route("/restaurants/{id}", put(restaurants::upsert_restaurant))
		.route(
			"/reports/financial-summary",
			get(reports::financial_summary),
		)
		.route("/reports/credit-overview", get(reports::credit_overview));

	Router::new()
		.nest("/api", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(api_config))
				.layer(DefaultBodyLimit::max(api_config.max_request_size))
				.layer(TimeoutLayer::with_status_code(
					StatusCode::REQUEST_TIMEOUT,
					Duration::from_secs(api_config.timeout_seconds),
				)),
		)
		.with_state(AppState { engine })
}

/// Allows the configured origins, or any origin when none are configured.
fn cors_layer(api_config: &ApiConfig) -> CorsLayer {
	match &api_config.cors {
		Some(cors) => {
			let origins: Vec<HeaderValue> = cors
				.allowed_origins
				.iter()
				.filter_map(|origin| match origin.parse::<HeaderValue>() {
					Ok(value) => Some(value),
					Err(_) => {
						tracing::warn!(%origin, "Ignoring invalid CORS origin");
						None
					},
				})
				.collect();
			CorsLayer::new()
				.allow_origin(AllowOrigin::list(origins))
				.allow_methods(tower_http::cors::Any)
				.allow_headers(tower_http::cors::Any)
		},
		None => CorsLayer::permissive(),
	}
}

/// Starts the HTTP server for the API.
///
/// Returns once `shutdown` resolves and in-flight requests have finished.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<DeliveryEngine>,
	shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(&api_config, engine);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Delivery API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown)
		.await?;

	Ok(())
}

/// Handles GET /api/health requests.
///
/// Reports `degraded` with 503 when the storage backend does not answer.
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
	match state.engine.storage().exists("health", "ping").await {
		Ok(_) => (
			StatusCode::OK,
			Json(serde_json::json!({
				"status": "ok",
				"service": state.engine.config().service.id,
			})),
		),
		Err(e) => {
			tracing::warn!("Health check failed: {}", e);
			(
				StatusCode::SERVICE_UNAVAILABLE,
				Json(serde_json::json!({
					"status": "degraded",
					"service": state.engine.config().service.id,
				})),
			)
		},
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use axum::body::{to_bytes, Body};
	use axum::http::{Request, Response};
	use delivery_config::ConfigBuilder;
	use delivery_core::{default_factories, EngineBuilder};
	use delivery_types::{GeoPoint, Restaurant};
	use tower::ServiceExt;

	pub(crate) fn zones() -> toml::Value {
		toml::from_str(
			r#"
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
	{ lat = -12.11, lng = -77.04 },
]
"#,
		)
		.unwrap()
	}

	pub(crate) fn api_config() -> ApiConfig {
		ApiConfig {
			enabled: true,
			host: "127.0.0.1".into(),
			port: 0,
			timeout_seconds: 30,
			max_request_size: 1024 * 1024,
			cors: None,
		}
	}

	/// Router over an in-memory engine holding restaurant `r1` in zone `mira`.
	pub(crate) async fn test_router() -> Router {
		let config = ConfigBuilder::new().static_zones(zones()).build();
		let engine = EngineBuilder::new(config)
			.build(default_factories())
			.await
			.unwrap();
		engine
			.upsert_restaurant(Restaurant {
				id: "r1".into(),
				city_id: "lima".into(),
				name: "La Lucha".into(),
				location: GeoPoint::new(-12.12, -77.03),
			})
			.await
			.unwrap();
		router(&api_config(), Arc::new(engine))
	}

	pub(crate) async fn send(
		router: &Router,
		method: &str,
		uri: &str,
		body: Option<serde_json::Value>,
	) -> Response<Body> {
		let builder = Request::builder()
			.method(method)
			.uri(uri)
			.header("content-type", "application/json");
		let request = match body {
			Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
			None => builder.body(Body::empty()).unwrap(),
		};
		router.clone().oneshot(request).await.unwrap()
	}

	pub(crate) async fn json_body(response: Response<Body>) -> serde_json::Value {
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn test_health() {
		let router = test_router().await;
		let response = send(&router, "GET", "/api/health", None).await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(json_body(response).await["status"], "ok");
	}

	#[tokio::test]
	async fn test_unknown_route_is_404() {
		let router = test_router().await;
		let response = send(&router, "GET", "/api/nothing-here", None).await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[test]
	fn test_cors_with_configured_origins() {
		let mut config = api_config();
		config.cors = Some(delivery_config::CorsConfig {
			allowed_origins: vec!["https://ops.example.com".into()],
		});
		let _ = cors_layer(&config);
	}
}
