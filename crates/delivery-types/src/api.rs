//! API types for the delivery core HTTP API.
//!
//! This module defines the request payloads accepted by the HTTP endpoints
//! and the structured error type returned by all of them. Responses reuse the
//! domain types directly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::{resolve_amount, MoneyError};
use crate::{Actor, GeoPoint, OrderStatus, PaymentMethod, ReportPeriod, RiderSelection};

/// Request body for `POST /orders/{id}/transitions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
	/// Target status; must be a direct edge from the current one.
	pub to: OrderStatus,
	pub actor: Actor,
	/// Free text; becomes the rejection or cancellation reason when relevant.
	#[serde(default)]
	pub notes: Option<String>,
}

/// Request body for `POST /orders/{id}/assignment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRiderRequest {
	/// `"auto"` or a rider id.
	pub rider: RiderSelection,
	pub actor: Actor,
}

/// Request body for `POST /orders/{id}/delivery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDeliveryRequest {
	/// What the rider actually collected.
	pub actual_payment_method: PaymentMethod,
	/// Opaque references returned by the evidence store.
	#[serde(default)]
	pub evidence_refs: Vec<String>,
	pub actor: Actor,
}

/// Request body for `POST /fees/quote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeQuoteRequest {
	/// Pickup point; the restaurant location is used when omitted.
	#[serde(default)]
	pub origin: Option<GeoPoint>,
	pub destination: GeoPoint,
	pub restaurant_id: String,
}

/// Request body for `POST /riders/{id}/credit/recharges`.
///
/// The amount is given either in cents or as the soles string the operator
/// typed, e.g. `"25.50"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeRequest {
	#[serde(default)]
	pub amount_cents: Option<i64>,
	#[serde(default)]
	pub amount_soles: Option<String>,
	/// External payment reference, stored as the row description.
	pub reference: String,
}

impl RechargeRequest {
	pub fn amount(&self) -> Result<i64, MoneyError> {
		resolve_amount(self.amount_cents, self.amount_soles.as_deref())
	}
}

/// Request body for `POST /riders/{id}/credit/adjustments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRequest {
	/// Signed amount; negative to charge the rider.
	#[serde(default)]
	pub amount_cents: Option<i64>,
	#[serde(default)]
	pub amount_soles: Option<String>,
	pub reason: String,
}

impl AdjustmentRequest {
	pub fn amount(&self) -> Result<i64, MoneyError> {
		resolve_amount(self.amount_cents, self.amount_soles.as_deref())
	}
}

/// Query string for `GET /reports/financial-summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialSummaryQuery {
	pub period: ReportPeriod,
	#[serde(default)]
	pub city_id: Option<String>,
}

/// Query string for `GET /reports/credit-overview`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditOverviewQuery {
	#[serde(default)]
	pub city_id: Option<String>,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter", default, skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed or invalid input (400)
	BadRequest {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Unknown order, rider or restaurant (404)
	NotFound { error_type: String, message: String },
	/// Lost a race or conflicting repeat request (409)
	Conflict {
		error_type: String,
		message: String,
		retryable: bool,
	},
	/// Business rule violation such as an illegal transition (422)
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
	/// Backend temporarily unavailable (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::InternalServerError { .. } => 500,
			APIError::ServiceUnavailable { .. } => 503,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		match self {
			APIError::BadRequest {
				error_type,
				message,
				details,
			}
			| APIError::UnprocessableEntity {
				error_type,
				message,
				details,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: details.clone(),
				retry_after: None,
			},
			APIError::NotFound {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
				retry_after: None,
			},
			APIError::Conflict {
				error_type,
				message,
				retryable,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: Some(serde_json::json!({ "retryable": retryable })),
				retry_after: None,
			},
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
				retry_after: *retry_after,
			},
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			APIError::UnprocessableEntity { message, .. } => {
				write!(f, "Unprocessable Entity: {}", message)
			},
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
			APIError::ServiceUnavailable { message, .. } => {
				write!(f, "Service Unavailable: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		let error_response = self.to_error_response();
		(status, Json(error_response)).into_response()
	}
}
