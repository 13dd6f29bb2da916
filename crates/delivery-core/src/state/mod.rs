//! State management for orders.
//!
//! This module provides the transition table and the state machine that
//! persists orders and their status history in atomic batches.

pub mod order;

pub use order::{OrderError, OrderStateMachine, TransitionTable};
