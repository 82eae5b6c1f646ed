//! Fleetbus - broadcast message bus for a broker and a small fleet of workers
//!
//! One process (the broker) publishes commands on a broadcast bus and collects replies.
//! Worker processes subscribe, execute the operations addressed to them by name and publish
//! the results back. A broker can additionally run as an explicit state machine whose
//! failing states fall back to its main state.
//!
//! # Core Concepts
//!
//! - **Envelope**: every message is one self-describing record, stamped at each hop
//! - **Star topology**: two broadcast directions; addressing is filtered by the receiver
//! - **Barriers**: readiness and shutdown are the only waits that fail hard on timeout
//! - **Trampoline**: states return their successor; failures restart at the main state
//!
//! # Modules
//!
//! - [`envelope`] - The message record and id allocation
//! - [`transport`] - TCP and in-process bus endpoints
//! - [`broker`] - Command publishing, registry, readiness and shutdown
//! - [`worker`] - Command table and the receive-dispatch-reply loop
//! - [`machine`] - State machine runner on top of the broker
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod broker;
pub mod cli;
pub mod config;
pub mod context;
pub mod demo;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod machine;
pub mod params;
pub mod registry;
pub mod sample;
pub mod timer;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use broker::Broker;
pub use config::{BusConfig, Config, LogConfig, TimeoutConfig};
pub use context::Context;
pub use envelope::{BROADCAST_TARGET, Envelope, IdAllocator, Status};
pub use error::BusError;
pub use machine::{Machine, Runner, State, Transition};
pub use params::{Kwargs, Params};
pub use registry::{Registry, RegistrySnapshot, WorkerState};
pub use timer::Timer;
pub use transport::{Hub, Link, MemoryBus};
pub use worker::{Command, CommandTable, Worker};
