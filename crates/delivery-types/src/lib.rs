//! Common types module for the delivery platform core.
//!
//! This module defines the domain types shared by every crate of the
//! workspace: orders and their status history, riders, zones, the rider credit
//! ledger, reporting structures, domain events and API payloads. Keeping them
//! in one crate ensures the state machine, the ledger and the HTTP layer agree
//! on a single vocabulary.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Checkout request types validated once at the system boundary.
pub mod checkout;
/// Domain events emitted after state changes commit.
pub mod events;
/// Geographic helpers: points, great-circle distance and polygon coverage.
pub mod geo;
/// Rider credit ledger types.
pub mod ledger;
/// Integer-cent money helpers.
pub mod money;
/// Order, line item and status history types.
pub mod order;
/// Registry trait for named, self-registering implementations.
pub mod registry;
/// Reporting types produced by the settlement aggregator.
pub mod reports;
/// Rider profile and assignment types.
pub mod rider;
/// Storage namespaces.
pub mod storage;
/// Small helpers shared across crates.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;
/// Delivery zones, restaurants and fee results.
pub mod zone;

pub use api::*;
pub use checkout::*;
pub use events::*;
pub use geo::{haversine_meters, polygon_contains, GeoPoint};
pub use ledger::*;
pub use money::{resolve_amount, soles_to_cents, MoneyError};
pub use order::*;
pub use registry::ImplementationRegistry;
pub use reports::*;
pub use rider::*;
pub use storage::*;
pub use utils::{current_time, truncate_id};
pub use validation::*;
pub use zone::*;
