//! Envelope - the self-describing message record exchanged on the bus
//!
//! Every message published by the broker or a worker is one `Envelope`, encoded as a single
//! JSON object. Decoding rejects unknown fields so that a broker and a worker built from
//! different protocol revisions fail loudly instead of silently dropping data.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::BusError;
use crate::params::{Kwargs, Params};

/// Target name that addresses every worker on the bus
pub const BROADCAST_TARGET: &str = "all";

/// Id carried by every message that originates at a worker
pub const WORKER_ORIGIN_ID: i64 = -1;

/// Broker message ids wrap back to zero at this value
pub const ID_WRAP: i64 = 10_000_000;

/// Placeholder written in place of redacted values when rendering
const REDACTED: &str = "***";

/// Lifecycle of a single request
///
/// Transitions only move forward: `none -> loading -> terminal`. The terminal states are
/// `success` and the error family (`error`, `invalid_function`, `function_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    None,
    Loading,
    Success,
    Error,
    InvalidFunction,
    FunctionError,
}

impl Status {
    fn rank(self) -> u8 {
        match self {
            Status::None => 0,
            Status::Loading => 1,
            Status::Success | Status::Error | Status::InvalidFunction | Status::FunctionError => 2,
        }
    }

    /// True once the request has finished, successfully or not
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// True for `error`, `invalid_function` and `function_error`
    pub fn is_error(self) -> bool {
        matches!(self, Status::Error | Status::InvalidFunction | Status::FunctionError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::None => "none",
            Status::Loading => "loading",
            Status::Success => "success",
            Status::Error => "error",
            Status::InvalidFunction => "invalid_function",
            Status::FunctionError => "function_error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of communication on the bus
///
/// `target_client` names the worker a message concerns: the addressee of a broker command, or
/// the sender of a worker-originated message or reply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(default)]
    pub origin_server: Option<String>,

    #[serde(default)]
    pub target_client: Option<String>,

    /// Requested operation; empty or absent marks a null envelope
    #[serde(default)]
    pub operation: Option<String>,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: Kwargs,

    #[serde(default)]
    pub result: Vec<Value>,

    #[serde(default)]
    pub status: Status,

    /// One timestamp per hop, oldest first
    #[serde(default)]
    pub trace_times: Vec<DateTime<Utc>>,

    #[serde(default)]
    pub id: Option<i64>,

    /// Hide args and kwargs when rendering; the wire payload is unaffected
    #[serde(default)]
    pub redact_args: bool,

    /// Hide the result when rendering; the wire payload is unaffected
    #[serde(default)]
    pub redact_result: bool,
}

impl Envelope {
    /// The sentinel returned when no message is available
    pub fn null() -> Self {
        Self::default()
    }

    /// Create a request for `operation` addressed to `target`
    pub fn request(target: impl Into<String>, operation: impl Into<String>, params: Params) -> Self {
        Self {
            target_client: Some(target.into()),
            operation: Some(operation.into()),
            args: params.args,
            kwargs: params.kwargs,
            ..Self::default()
        }
    }

    /// A null envelope carries no actionable request
    pub fn is_null(&self) -> bool {
        self.operation().is_none()
    }

    /// The requested operation, treating an empty name as absent
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref().filter(|op| !op.is_empty())
    }

    /// The worker this message concerns, treating an empty name as absent
    pub fn target(&self) -> Option<&str> {
        self.target_client.as_deref().filter(|t| !t.is_empty())
    }

    /// The positional and keyword arguments as one bundle
    pub fn params(&self) -> Params {
        Params {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }

    /// True if this is a reply from `client` for `operation`
    pub fn matches(&self, client: &str, operation: &str) -> bool {
        self.target() == Some(client) && self.operation() == Some(operation)
    }

    /// Number of hops recorded so far
    pub fn hops(&self) -> usize {
        self.trace_times.len()
    }

    /// Append a hop timestamp, never earlier than the previous one
    pub fn stamp(&mut self) {
        let now = Utc::now();
        let next = match self.trace_times.last() {
            Some(last) if *last > now => *last,
            _ => now,
        };
        self.trace_times.push(next);
    }

    /// Move the status forward
    ///
    /// Setting the current status again is a no-op. Any move that does not strictly advance
    /// the lifecycle is rejected.
    pub fn advance(&mut self, next: Status) -> Result<(), BusError> {
        if next == self.status {
            return Ok(());
        }
        if next.rank() <= self.status.rank() {
            return Err(BusError::StatusRegression {
                from: self.status,
                to: next,
            });
        }
        debug!(from = %self.status, to = %next, "Envelope::advance: called");
        self.status = next;
        Ok(())
    }

    /// Encode into the wire representation
    pub fn encode(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the wire representation
    pub fn decode(text: &str) -> Result<Self, BusError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode raw frame bytes; invalid UTF-8 is reported like any other malformed frame
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        if let Value::Object(map) = &mut value {
            if self.redact_args {
                map.insert("args".to_string(), Value::Array(vec![Value::from(REDACTED)]));
                let mut hidden = Kwargs::new();
                hidden.insert(REDACTED.to_string(), Value::from(REDACTED));
                map.insert("kwargs".to_string(), Value::Object(hidden));
            }
            if self.redact_result {
                map.insert("result".to_string(), Value::Array(vec![Value::from(REDACTED)]));
            }
        }
        write!(f, "{}", value)
    }
}

/// Allocates broker message ids
///
/// Ids count up from zero and wrap at [`ID_WRAP`]. The worker sentinel
/// [`WORKER_ORIGIN_ID`] is never produced.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `start` (reduced into the valid range)
    pub fn starting_at(start: i64) -> Self {
        Self {
            next: start.rem_euclid(ID_WRAP),
        }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next = (self.next + 1) % ID_WRAP;
        id
    }
}
