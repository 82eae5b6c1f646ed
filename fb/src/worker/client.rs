//! Worker - receives addressed commands, executes them and replies
//!
//! A worker owns one [`Link`] to the broker's hub. It only acts on envelopes addressed to its
//! own name or broadcast to `all`; everything else on the bus is ignored.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use eyre::Result;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::command::{CloseFlag, CommandTable, PING, PONG};
use crate::context::Context;
use crate::envelope::{BROADCAST_TARGET, Envelope, Status, WORKER_ORIGIN_ID};
use crate::error::{BusError, panic_message};
use crate::params::Params;
use crate::transport::Link;

/// Operation name carried by the report a worker sends when its loop fails
pub const ERROR_REPORT: &str = "error";

/// One worker process on the bus
pub struct Worker {
    name: String,
    link: Link,
    commands: CommandTable,
    closed: CloseFlag,
    poll_interval: Duration,
}

impl Worker {
    /// Connect to the broker described by `ctx` and announce that this worker is loading
    pub async fn connect(ctx: &Context, commands: CommandTable) -> Result<Self, BusError> {
        debug!(name = %ctx.name(), "Worker::connect: called");
        let link = Link::connect(ctx.bus()).await?;
        let mut worker = Self::with_link(ctx.name(), link, commands, ctx.poll_interval());
        worker.announce_loading().await?;
        Ok(worker)
    }

    /// Build a worker over an existing link (no announcement is sent)
    pub fn with_link(name: impl Into<String>, link: Link, commands: CommandTable, poll_interval: Duration) -> Self {
        let name = name.into();
        debug!(%name, "Worker::with_link: called");
        let closed = commands.close_flag();
        Self {
            name,
            link,
            commands,
            closed,
            poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request the run loop to stop; no reply is sent
    pub fn close(&self) {
        debug!(name = %self.name, "Worker::close: called");
        self.closed.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    /// Tell the broker this worker is up but not ready yet
    ///
    /// Shaped like a `ping` reply with status `loading` so the readiness handshake picks it up.
    pub async fn announce_loading(&mut self) -> Result<(), BusError> {
        debug!(name = %self.name, "Worker::announce_loading: called");
        let mut envelope = self.local_envelope(PING, Params::empty(), Status::Loading, false);
        envelope.result = vec![Value::from(PONG)];
        self.publish(envelope).await
    }

    /// Publish a worker-originated message
    pub async fn send(
        &mut self,
        operation: &str,
        params: Params,
        status: Status,
        redact_args: bool,
    ) -> Result<(), BusError> {
        let envelope = self.local_envelope(operation, params, status, redact_args);
        self.publish(envelope).await
    }

    /// Next envelope for this worker, or the null envelope
    ///
    /// A broadcast is rewritten to name this worker so handlers always see a concrete addressee.
    pub async fn recv(&mut self, timeout: Duration) -> Envelope {
        let Some(mut envelope) = self.link.poll(timeout).await else {
            return Envelope::null();
        };
        match envelope.target() {
            Some(target) if target == self.name => {}
            Some(BROADCAST_TARGET) => envelope.target_client = Some(self.name.clone()),
            _ => return Envelope::null(),
        }
        envelope.stamp();
        trace!(name = %self.name, "recv {}", envelope);
        envelope
    }

    /// Send a dispatched envelope back to the broker
    pub async fn return_reply(&mut self, envelope: Envelope) -> Result<(), BusError> {
        self.publish(envelope).await
    }

    /// Execute the envelope's operation against the command table
    ///
    /// Failures are reported in-band through the status; nothing escapes.
    pub async fn dispatch(&self, mut envelope: Envelope) -> Envelope {
        let Some(operation) = envelope.operation().map(str::to_string) else {
            return envelope;
        };
        debug!(name = %self.name, %operation, "Worker::dispatch: called");

        let Some(command) = self.commands.get(&operation) else {
            warn!(name = %self.name, %operation, "Unknown operation requested");
            self.set_status(&mut envelope, Status::InvalidFunction);
            return envelope;
        };

        self.set_status(&mut envelope, Status::Loading);
        let outcome = AssertUnwindSafe(command.call(envelope.params())).catch_unwind().await;
        match outcome {
            Ok(Ok(result)) => {
                envelope.result = result;
                self.set_status(&mut envelope, Status::Success);
            }
            Ok(Err(e)) => {
                error!(name = %self.name, %operation, request = %envelope, "Command failed: {:?}", e);
                self.set_status(&mut envelope, Status::FunctionError);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(name = %self.name, %operation, request = %envelope, "Command panicked: {}", message);
                self.set_status(&mut envelope, Status::FunctionError);
            }
        }
        envelope
    }

    /// Receive, dispatch and reply until closed
    ///
    /// The closed flag is checked at the top of each iteration. A transport failure is reported
    /// to the broker as an `error` envelope and returned.
    pub async fn run(&mut self) -> Result<()> {
        info!(name = %self.name, "Worker running");
        while !self.is_closed() {
            if let Err(e) = self.step().await {
                error!(name = %self.name, "Worker loop failed: {}", e);
                let report = Params::positional(vec![Value::from(e.to_string())]);
                if let Err(send_err) = self.send(ERROR_REPORT, report, Status::Error, false).await {
                    warn!(name = %self.name, error = %send_err, "Failed to report worker failure");
                }
                return Err(e.into());
            }
        }
        info!(name = %self.name, "Worker closed");
        Ok(())
    }

    async fn step(&mut self) -> Result<(), BusError> {
        let envelope = self.recv(self.poll_interval).await;
        if envelope.is_null() {
            return Ok(());
        }
        let reply = self.dispatch(envelope).await;
        self.return_reply(reply).await
    }

    fn local_envelope(&self, operation: &str, params: Params, status: Status, redact_args: bool) -> Envelope {
        let mut envelope = Envelope::request(self.name.clone(), operation, params);
        envelope.status = status;
        envelope.id = Some(WORKER_ORIGIN_ID);
        envelope.redact_args = redact_args;
        envelope
    }

    async fn publish(&mut self, mut envelope: Envelope) -> Result<(), BusError> {
        envelope.stamp();
        self.link.publish(&envelope).await?;
        trace!(name = %self.name, "sent {}", envelope);
        Ok(())
    }

    fn set_status(&self, envelope: &mut Envelope, status: Status) {
        if let Err(e) = envelope.advance(status) {
            warn!(name = %self.name, error = %e, "Ignoring status change");
        }
    }
}
