//! Handlers for the order lifecycle.
//!
//! Each handler owns one side-effecting part of the lifecycle: checkout,
//! rider assignment, delivery with ledger settlement, and the generic
//! transition entry point that dispatches to the others.

pub mod assignment;
pub mod checkout;
pub mod delivery;
pub mod order;

pub use assignment::AssignmentHandler;
pub use checkout::CheckoutHandler;
pub use delivery::DeliveryHandler;
pub use order::OrderHandler;

use crate::state::OrderError;
use delivery_pricing::PricingError;
use delivery_storage::StorageError;

impl From<PricingError> for OrderError {
	fn from(e: PricingError) -> Self {
		match e {
			PricingError::RestaurantNotFound(id) => OrderError::RestaurantNotFound(id),
			PricingError::InvalidCoordinates(msg) => OrderError::Validation(msg),
			PricingError::ZoneStore(msg) | PricingError::Configuration(msg) => {
				OrderError::Storage(StorageError::Backend(msg))
			},
		}
	}
}
