//! Reflection Loop
//!
//! - `state` - the pure turn transition table
//! - `signal` - corrective messages for each failure kind
//! - `coordinator` - drives one turn through the states

pub mod coordinator;
pub mod signal;
pub mod state;

pub use coordinator::{CoordinatorConfig, ReflectionCoordinator};
pub use signal::{ReflectionSignal, SignalKind};
pub use state::{next, InvalidTransition, TurnEvent, TurnState};
