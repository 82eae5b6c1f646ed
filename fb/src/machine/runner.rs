//! Runner - the trampoline driving a coordinator state machine
//!
//! The runner repeatedly invokes the current state and switches to whatever state it returns.
//! A failing state is recovered by restarting at the main state; a failing main state ends
//! the run.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, eyre};
use futures::FutureExt;
use tracing::{debug, error, info};

use super::state::{State, Transition};
use crate::broker::Broker;
use crate::error::{BusError, panic_message};
use crate::params::Params;

/// A coordinator built on a [`Broker`]
#[async_trait]
pub trait Machine: Send + Sized + 'static {
    /// The broker this machine talks through
    fn broker(&mut self) -> &mut Broker;

    /// Entry state, and the state every recovered failure restarts from
    fn main_state(&self) -> State<Self>;

    /// Shut the workers down
    async fn close(&mut self, timeout: Duration) -> Result<(), BusError> {
        self.broker().close(timeout).await
    }
}

/// Drives a [`Machine`] from its main state until a state stops it
pub struct Runner<M: Machine> {
    machine: M,
    state_name: String,
}

impl<M: Machine> Runner<M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            state_name: "init".to_string(),
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn into_inner(self) -> M {
        self.machine
    }

    /// Display name of the state currently (or last) executing
    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    /// Run until a state returns [`Transition::Stop`]
    ///
    /// Errors and panics in any state but the main state are logged and the machine restarts
    /// at the main state with empty parameters. A failure of the main state is returned.
    pub async fn run(&mut self) -> Result<()> {
        let main = self.machine.main_state();
        let mut state = main;
        let mut params = Params::empty();

        loop {
            debug!(state = state.name(), "Runner::run: entering state");
            self.state_name = state.display_name();

            let outcome = AssertUnwindSafe(state.invoke(&mut self.machine, params))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(Transition::Continue { next, params: next_params })) => {
                    state = next;
                    params = next_params;
                    continue;
                }
                Ok(Ok(Transition::Stop)) => {
                    info!(state = state.name(), "State machine stopped");
                    return Ok(());
                }
                Ok(Ok(Transition::Failed(report))) | Ok(Err(report)) => report,
                Err(payload) => eyre!("State panicked: {}", panic_message(payload.as_ref())),
            };

            if state.same_as(&main) {
                error!(state = state.name(), "Main state failed: {:?}", failure);
                return Err(failure.wrap_err(format!("Main state {} failed", state.name())));
            }

            error!(
                state = state.name(),
                "State failed, returning to {}: {:?}",
                main.name(),
                failure
            );
            state = main;
            params = Params::empty();
        }
    }

    /// Close the machine's workers
    pub async fn close(&mut self, timeout: Duration) -> Result<(), BusError> {
        debug!(?timeout, "Runner::close: called");
        self.machine.close(timeout).await
    }
}
