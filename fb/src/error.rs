//! Bus error types

use std::any::Any;

use thiserror::Error;

use crate::envelope::Status;
use crate::registry::RegistrySnapshot;

/// Errors raised by the bus, broker and worker
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Timed out waiting for workers to become ready: {registry}")]
    ReadinessTimeout { registry: RegistrySnapshot },

    #[error("Timed out waiting for workers to close: {registry}")]
    ShutdownTimeout { registry: RegistrySnapshot },

    #[error("Timed out waiting for '{operation}' reply from {client}")]
    ReplyTimeout { client: String, operation: String },

    #[error("Failed to bind {address}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn worker {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bus connection closed")]
    Closed,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Malformed envelope: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status cannot move from {from} to {to}")]
    StatusRegression { from: Status, to: Status },

    #[error("Command already registered: {name}")]
    DuplicateCommand { name: String },

    #[error("Invalid command name: {name:?}")]
    InvalidCommandName { name: String },
}

/// Best-effort text for a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
