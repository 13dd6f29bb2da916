//! HTTP handlers for the delivery API.
//!
//! Each submodule maps one group of routes onto `DeliveryEngine` calls. Engine
//! errors are translated here into the structured `APIError` responses.

pub mod fees;
pub mod orders;
pub mod reports;
pub mod restaurants;
pub mod riders;

use axum::{extract::FromRequestParts, http::request::Parts};
use delivery_core::{EngineError, OrderError};
use delivery_ledger::LedgerError;
use delivery_pricing::PricingError;
use delivery_storage::StorageError;
use delivery_types::{APIError, Actor, ActorKind, MoneyError};

/// Header naming the kind of party behind a request.
pub const ACTOR_KIND_HEADER: &str = "x-actor-kind";
/// Header carrying the id of the party behind a request.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Actor taken from the `x-actor-kind` and `x-actor-id` headers.
///
/// Requests without them act as the system actor.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
	S: Send + Sync,
{
	type Rejection = APIError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let header = |name: &str| {
			parts
				.headers
				.get(name)
				.and_then(|v| v.to_str().ok())
				.map(str::trim)
				.filter(|v| !v.is_empty())
		};

		let Some(kind) = header(ACTOR_KIND_HEADER) else {
			return Ok(RequestActor(Actor::system()));
		};
		let kind: ActorKind = serde_json::from_value(serde_json::Value::String(kind.to_string()))
			.map_err(|_| APIError::BadRequest {
				error_type: "INVALID_ACTOR".to_string(),
				message: format!("Unknown actor kind '{}'", kind),
				details: None,
			})?;
		let id = header(ACTOR_ID_HEADER).ok_or_else(|| APIError::BadRequest {
			error_type: "INVALID_ACTOR".to_string(),
			message: format!("Header {} is required with {}", ACTOR_ID_HEADER, ACTOR_KIND_HEADER),
			details: None,
		})?;

		Ok(RequestActor(Actor::new(kind, id)))
	}
}

/// Translates an engine error into its HTTP representation.
pub fn engine_error(e: EngineError) -> APIError {
	match e {
		EngineError::Order(e) => order_error(e),
		EngineError::Ledger(e) => ledger_error(e),
		EngineError::Pricing(e) => pricing_error(e),
		EngineError::Storage(e) => storage_error(e),
		EngineError::NotFound(what) => APIError::NotFound {
			error_type: "NOT_FOUND".to_string(),
			message: format!("{} not found", what),
		},
		EngineError::Validation(message) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message,
			details: None,
		},
		EngineError::Config(message) => APIError::InternalServerError {
			error_type: "CONFIGURATION_ERROR".to_string(),
			message,
		},
	}
}

fn order_error(e: OrderError) -> APIError {
	let message = e.to_string();
	match e {
		OrderError::NotFound(_) => APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message,
		},
		OrderError::RiderNotFound(_) => APIError::NotFound {
			error_type: "RIDER_NOT_FOUND".to_string(),
			message,
		},
		OrderError::RestaurantNotFound(_) => APIError::NotFound {
			error_type: "RESTAURANT_NOT_FOUND".to_string(),
			message,
		},
		OrderError::InvalidTransition { from, to, allowed } => APIError::UnprocessableEntity {
			error_type: "INVALID_TRANSITION".to_string(),
			message,
			details: Some(serde_json::json!({
				"from": from,
				"to": to,
				"allowed": allowed,
			})),
		},
		OrderError::StaleState(_) => APIError::Conflict {
			error_type: "STALE_STATE".to_string(),
			message,
			retryable: true,
		},
		OrderError::RiderUnavailable(_) => APIError::Conflict {
			error_type: "RIDER_UNAVAILABLE".to_string(),
			message,
			retryable: false,
		},
		OrderError::PaymentMethodMismatch { .. } => APIError::Conflict {
			error_type: "PAYMENT_METHOD_MISMATCH".to_string(),
			message,
			retryable: false,
		},
		OrderError::ZoneUncovered(_) => APIError::UnprocessableEntity {
			error_type: "ZONE_UNCOVERED".to_string(),
			message,
			details: None,
		},
		OrderError::Ledger(e) => ledger_error(e),
		OrderError::SettlementFailed(_) => APIError::InternalServerError {
			error_type: "SETTLEMENT_FAILED".to_string(),
			message,
		},
		OrderError::Validation(message) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message,
			details: None,
		},
		OrderError::Storage(e) => storage_error(e),
	}
}

fn ledger_error(e: LedgerError) -> APIError {
	let message = e.to_string();
	match e {
		LedgerError::InvalidAmount(_) => APIError::BadRequest {
			error_type: "INVALID_AMOUNT".to_string(),
			message,
			details: None,
		},
		LedgerError::Corrupted(_) => APIError::InternalServerError {
			error_type: "LEDGER_CORRUPTED".to_string(),
			message,
		},
		LedgerError::Configuration(_) => APIError::InternalServerError {
			error_type: "CONFIGURATION_ERROR".to_string(),
			message,
		},
		LedgerError::Storage(e) => storage_error(e),
	}
}

/// Rejects an amount the request did not state unambiguously.
pub fn money_error(e: MoneyError) -> APIError {
	APIError::BadRequest {
		error_type: "INVALID_AMOUNT".to_string(),
		message: e.to_string(),
		details: None,
	}
}

fn pricing_error(e: PricingError) -> APIError {
	let message = e.to_string();
	match e {
		PricingError::RestaurantNotFound(_) => APIError::NotFound {
			error_type: "RESTAURANT_NOT_FOUND".to_string(),
			message,
		},
		PricingError::InvalidCoordinates(_) => APIError::BadRequest {
			error_type: "INVALID_COORDINATES".to_string(),
			message,
			details: None,
		},
		PricingError::ZoneStore(_) => APIError::ServiceUnavailable {
			error_type: "ZONE_STORE_UNAVAILABLE".to_string(),
			message,
			retry_after: Some(1),
		},
		PricingError::Configuration(_) => APIError::InternalServerError {
			error_type: "CONFIGURATION_ERROR".to_string(),
			message,
		},
	}
}

fn storage_error(e: StorageError) -> APIError {
	let message = e.to_string();
	match e {
		StorageError::NotFound => APIError::NotFound {
			error_type: "NOT_FOUND".to_string(),
			message,
		},
		StorageError::Conflict(_) => APIError::Conflict {
			error_type: "STALE_STATE".to_string(),
			message,
			retryable: true,
		},
		StorageError::Timeout(_) => APIError::ServiceUnavailable {
			error_type: "STORAGE_UNAVAILABLE".to_string(),
			message,
			retry_after: Some(1),
		},
		StorageError::Serialization(_)
		| StorageError::Backend(_)
		| StorageError::Configuration(_) => APIError::InternalServerError {
			error_type: "STORAGE_ERROR".to_string(),
			message,
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::Request;
	use delivery_types::{OrderStatus, PaymentMethod};

	#[test]
	fn test_invalid_transition_lists_allowed_states() {
		let err = engine_error(EngineError::Order(OrderError::InvalidTransition {
			from: OrderStatus::Cart,
			to: OrderStatus::Delivered,
			allowed: vec![OrderStatus::AwaitingConfirmation, OrderStatus::Cancelled],
		}));
		assert_eq!(err.status_code(), 422);
		let details = err.to_error_response().details.unwrap();
		assert_eq!(details["allowed"].as_array().unwrap().len(), 2);
	}

	#[test]
	fn test_status_mapping() {
		let cases = vec![
			(EngineError::Order(OrderError::NotFound("o-1".into())), 404),
			(EngineError::Order(OrderError::StaleState("o-1".into())), 409),
			(EngineError::Order(OrderError::RiderUnavailable("busy".into())), 409),
			(
				EngineError::Order(OrderError::PaymentMethodMismatch {
					order_id: "o-1".into(),
					recorded: PaymentMethod::Cash,
					requested: PaymentMethod::Yape,
				}),
				409,
			),
			(
				EngineError::Order(OrderError::SettlementFailed("no ledger rows".into())),
				500,
			),
			(
				EngineError::Order(OrderError::Ledger(LedgerError::Corrupted("rd-1".into()))),
				500,
			),
			(
				EngineError::Order(LedgerError::Storage(StorageError::Timeout("get".into())).into()),
				503,
			),
			(
				EngineError::Order(LedgerError::Storage(StorageError::Conflict("acct".into())).into()),
				409,
			),
			(EngineError::Validation("bad".into()), 400),
			(EngineError::NotFound("Rider r-9".into()), 404),
			(EngineError::Storage(StorageError::Timeout("get".into())), 503),
			(EngineError::Storage(StorageError::Backend("disk".into())), 500),
			(EngineError::Ledger(LedgerError::InvalidAmount("0".into())), 400),
		];
		for (err, status) in cases {
			assert_eq!(engine_error(err).status_code(), status);
		}
	}

	#[test]
	fn test_stale_state_is_retryable() {
		let err = engine_error(EngineError::Order(OrderError::StaleState("o-1".into())));
		let body = err.to_error_response();
		assert_eq!(body.error, "STALE_STATE");
		assert_eq!(body.details.unwrap()["retryable"], true);
	}

	#[tokio::test]
	async fn test_request_actor_from_headers() {
		let (mut parts, _) = Request::builder()
			.header(ACTOR_KIND_HEADER, "operator")
			.header(ACTOR_ID_HEADER, "op-7")
			.body(())
			.unwrap()
			.into_parts();
		let RequestActor(actor) = RequestActor::from_request_parts(&mut parts, &())
			.await
			.unwrap();
		assert_eq!(actor, Actor::new(ActorKind::Operator, "op-7"));

		let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
		let RequestActor(actor) = RequestActor::from_request_parts(&mut parts, &())
			.await
			.unwrap();
		assert_eq!(actor, Actor::system());

		let (mut parts, _) = Request::builder()
			.header(ACTOR_KIND_HEADER, "alien")
			.header(ACTOR_ID_HEADER, "x")
			.body(())
			.unwrap()
			.into_parts();
		assert!(RequestActor::from_request_parts(&mut parts, &()).await.is_err());
	}
}
