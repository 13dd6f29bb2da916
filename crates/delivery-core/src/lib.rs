//! Core engine for the delivery platform.
//!
//! This crate coordinates the order lifecycle: checkout, the order state
//! machine, rider assignment, delivery with credit ledger settlement, and the
//! read-only settlement reports. Every state change commits as one
//! conditional storage batch and is announced on the event bus afterwards.

pub mod builder;
pub mod collaborators;
pub mod engine;
pub mod handlers;
pub mod reports;
pub mod state;

pub use builder::{default_factories, BuilderError, EngineBuilder, EngineFactories};
pub use engine::{event_bus::EventBus, DeliveryEngine, EngineError, EngineParts};
pub use reports::SettlementAggregator;
pub use state::{OrderError, OrderStateMachine, TransitionTable};
