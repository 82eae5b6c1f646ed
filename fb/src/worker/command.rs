//! Command table - the named capabilities a worker can execute
//!
//! Operation names are resolved against an explicit table built before the worker starts.
//! Names are validated when registered, so a typo or a clash with a built-in fails at
//! startup rather than surfacing as `invalid_function` at run time.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eyre::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::BusError;
use crate::params::Params;

/// Built-in readiness check
pub const PING: &str = "ping";

/// Built-in shutdown request
pub const CLOSE: &str = "close";

/// Reply value of the built-in `ping`
pub const PONG: &str = "pong";

/// A named operation a worker can run on request
#[async_trait]
pub trait Command: Send + Sync {
    /// Execute with the request's parameters, returning the result values
    async fn call(&self, params: Params) -> Result<Vec<Value>>;
}

/// Turn a serializable return value into result values
///
/// `()`/null produces an empty result; anything else a single value.
pub fn into_values<R: Serialize>(value: R) -> Result<Vec<Value>> {
    match serde_json::to_value(value)? {
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

/// Adapter giving a typed closure the [`Command`] interface
struct FnCommand<A, R, F> {
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<A, R, F> Command for FnCommand<A, R, F>
where
    A: DeserializeOwned + 'static,
    R: Serialize + 'static,
    F: Fn(A) -> Result<R> + Send + Sync,
{
    async fn call(&self, params: Params) -> Result<Vec<Value>> {
        let input: A = params.parse()?;
        into_values((self.f)(input)?)
    }
}

/// Shared flag flipped by the built-in `close` command
#[derive(Debug, Clone, Default)]
pub struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    async fn call(&self, _params: Params) -> Result<Vec<Value>> {
        Ok(vec![Value::from(PONG)])
    }
}

struct CloseCommand(CloseFlag);

#[async_trait]
impl Command for CloseCommand {
    async fn call(&self, _params: Params) -> Result<Vec<Value>> {
        self.0.close();
        Ok(Vec::new())
    }
}

/// Mapping from operation name to handler
///
/// Every table carries the built-ins `ping` and `close`.
#[derive(Clone)]
pub struct CommandTable {
    commands: BTreeMap<String, Arc<dyn Command>>,
    closed: CloseFlag,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        let closed = CloseFlag::new();
        let mut commands: BTreeMap<String, Arc<dyn Command>> = BTreeMap::new();
        commands.insert(PING.to_string(), Arc::new(PingCommand));
        commands.insert(CLOSE.to_string(), Arc::new(CloseCommand(closed.clone())));
        Self { commands, closed }
    }

    /// Register a handler under `name`
    pub fn register(&mut self, name: &str, command: impl Command + 'static) -> Result<&mut Self, BusError> {
        debug!(%name, "CommandTable::register: called");
        validate_name(name)?;
        if self.commands.contains_key(name) {
            return Err(BusError::DuplicateCommand { name: name.to_string() });
        }
        self.commands.insert(name.to_string(), Arc::new(command));
        Ok(self)
    }

    /// Register a typed closure under `name`
    ///
    /// Request parameters are deserialized into `A` (see [`Params::parse`]) and the returned
    /// `R` becomes the reply's result.
    pub fn register_fn<A, R, F>(&mut self, name: &str, f: F) -> Result<&mut Self, BusError>
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        self.register(
            name,
            FnCommand {
                f,
                _marker: PhantomData,
            },
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// The flag the built-in `close` sets
    pub fn close_flag(&self) -> CloseFlag {
        self.closed.clone()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("closed", &self.closed.is_closed())
            .finish()
    }
}

/// Names must look like identifiers: `[A-Za-z_][A-Za-z0-9_]*`
fn validate_name(name: &str) -> Result<(), BusError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(BusError::InvalidCommandName { name: name.to_string() })
    }
}
