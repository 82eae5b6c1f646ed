//! States and transitions of a coordinator state machine

use std::fmt;

use eyre::Result;
use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::params::{Kwargs, Params};

/// Conventional suffix of state function names, dropped from display names
const STATE_SUFFIX: &str = "_state";

/// Signature every state function is adapted to
///
/// The future is not required to be `Send`: the runner awaits it in place, and a `Send` bound
/// would stop a state from naming itself or any state that leads back to it.
pub type StateFn<M> = for<'a> fn(&'a mut M, Params) -> LocalBoxFuture<'a, Result<Transition<M>>>;

/// A named state of machine `M`
///
/// Usually built with the [`state!`](crate::state) macro, which records the function's name.
pub struct State<M> {
    name: &'static str,
    path: &'static str,
    run: StateFn<M>,
}

impl<M> State<M> {
    /// Wrap `run` under `name`; a path like `Self::main_state` keeps only its last segment
    pub fn new(name: &'static str, run: StateFn<M>) -> Self {
        Self { name, path: name, run }
    }

    /// Identify the state by the fully qualified `path` of its function rather than its name
    pub fn with_path(mut self, path: &'static str) -> Self {
        self.path = path;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name).trim()
    }

    /// Human-readable name: `wait_for_workers_state` becomes `wait for workers`
    pub fn display_name(&self) -> String {
        let name = self.name();
        name.strip_suffix(STATE_SUFFIX).unwrap_or(name).replace('_', " ")
    }

    /// Whether both handles run the same function
    ///
    /// Handles built by [`state!`](crate::state) compare by the function's fully qualified path,
    /// so `Self::main_state` and `Demo::main_state` match while `Other::main_state` does not.
    pub fn same_as(&self, other: &State<M>) -> bool {
        self.path == other.path
    }

    pub(crate) fn invoke<'a>(&self, machine: &'a mut M, params: Params) -> LocalBoxFuture<'a, Result<Transition<M>>> {
        (self.run)(machine, params)
    }
}

impl<M> Clone for State<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for State<M> {}

impl<M> fmt::Debug for State<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("State").field(&self.name()).finish()
    }
}

/// Build a [`State`] from an async state function
///
/// The function must have the shape `async fn(&mut M, Params) -> eyre::Result<Transition<M>>`.
///
/// ```ignore
/// fn main_state(&self) -> State<Self> {
///     state!(Self::main_state)
/// }
/// ```
#[macro_export]
macro_rules! state {
    ($($segment:ident)::+) => {
        $crate::machine::State::new(stringify!($($segment)::+), |machine, params| {
            ::std::boxed::Box::pin($($segment)::+(machine, params))
        })
        .with_path(::std::any::type_name_of_val(&$($segment)::+))
    };
}

/// What a state asks the runner to do next
pub enum Transition<M> {
    /// Invoke `next` with `params`
    Continue { next: State<M>, params: Params },
    /// End the run
    Stop,
    /// The state failed; handled like a returned error
    Failed(eyre::Report),
}

impl<M> Transition<M> {
    /// Continue with `next` and no arguments
    pub fn to(next: State<M>) -> Self {
        Self::Continue {
            next,
            params: Params::empty(),
        }
    }

    /// Continue with `next` and positional arguments
    pub fn with_args(next: State<M>, args: Vec<Value>) -> Self {
        Self::Continue {
            next,
            params: Params::positional(args),
        }
    }

    /// Continue with `next` and both positional and keyword arguments
    pub fn with(next: State<M>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self::Continue {
            next,
            params: Params { args, kwargs },
        }
    }

    pub fn stop() -> Self {
        Self::Stop
    }

    pub fn failed(report: eyre::Report) -> Self {
        Self::Failed(report)
    }
}

impl<M> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue { next, params } => f
                .debug_struct("Continue")
                .field("next", next)
                .field("params", params)
                .finish(),
            Self::Stop => f.write_str("Stop"),
            Self::Failed(report) => f.debug_tuple("Failed").field(&report.to_string()).finish(),
        }
    }
}
