//! Coordinator state machines built on the broker

mod runner;
mod state;

pub use runner::{Machine, Runner};
pub use state::{State, StateFn, Transition};
