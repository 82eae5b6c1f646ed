//! Broker - issues commands, tracks worker readiness and coordinates shutdown

use std::time::Duration;

use serde_json::Value;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::context::Context;
use crate::envelope::{BROADCAST_TARGET, Envelope, IdAllocator, Status};
use crate::error::BusError;
use crate::params::Params;
use crate::registry::{Registry, WorkerState};
use crate::timer::Timer;
use crate::transport::Hub;
use crate::worker::{CLOSE, PING, PONG};

/// The coordinating participant on the bus
///
/// Owns the hub, the worker registry and the id counter. All of them are mutated only from
/// the broker's own task, so no locking is involved.
pub struct Broker {
    name: String,
    hub: Hub,
    registry: Registry,
    ids: IdAllocator,
    poll_interval: Duration,
    ping_interval: Duration,
    pub(super) children: Vec<Child>,
    pub(super) tasks: Vec<JoinHandle<()>>,
}

impl Broker {
    /// Bind the bus endpoints from `ctx`
    pub async fn bind(ctx: &Context) -> Result<Self, BusError> {
        debug!(name = %ctx.name(), "Broker::bind: called");
        let hub = Hub::bind(ctx.bus()).await?;
        Ok(Self::with_hub(ctx, hub))
    }

    /// Build a broker over an existing hub
    pub fn with_hub(ctx: &Context, hub: Hub) -> Self {
        debug!(name = %ctx.name(), "Broker::with_hub: called");
        Self {
            name: ctx.name().to_string(),
            hub,
            registry: Registry::new(),
            ids: IdAllocator::new(),
            poll_interval: ctx.poll_interval(),
            ping_interval: ctx.bus().ping_interval(),
            children: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bound `(send_port, recv_port)`
    pub fn ports(&self) -> (u16, u16) {
        self.hub.ports()
    }

    /// Number of workers currently subscribed to the broker's broadcasts
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Track a worker started by other means
    pub fn register_worker(&mut self, name: &str) {
        self.registry.register(name);
    }

    /// Publish a command to `target` (a worker name or `all`)
    ///
    /// Returns the id assigned to the envelope. No acknowledgment is awaited.
    pub fn send(&mut self, target: &str, operation: &str, params: Params, redact_args: bool) -> i64 {
        let id = self.ids.next_id();
        let mut envelope = Envelope::request(target, operation, params);
        envelope.origin_server = Some(self.name.clone());
        envelope.id = Some(id);
        envelope.redact_args = redact_args;
        envelope.stamp();
        trace!("sent {}", envelope);
        self.hub.publish(envelope);
        id
    }

    /// Next envelope from any worker, or the null envelope on timeout
    pub async fn recv(&mut self, timeout: Duration) -> Envelope {
        match self.hub.poll(timeout).await {
            Some(mut envelope) => {
                envelope.stamp();
                trace!("recv {}", envelope);
                envelope
            }
            None => Envelope::null(),
        }
    }

    /// Keep receiving until something arrives or `timeout` elapses
    pub async fn recv_blocking(&mut self, timeout: Duration) -> Option<Envelope> {
        let timer = Timer::new(timeout);
        while timer.running() {
            let envelope = self.recv(self.slice(&timer)).await;
            if !envelope.is_null() {
                return Some(envelope);
            }
        }
        error!("Timed out waiting for response");
        None
    }

    /// Wait for the reply from `client` to `operation`, discarding other traffic
    ///
    /// Replies are matched by name only, so two in-flight calls to the same worker and
    /// operation can take each other's reply.
    pub async fn wait_for_function(&mut self, client: &str, operation: &str, timeout: Duration) -> Option<Envelope> {
        debug!(%client, %operation, "Broker::wait_for_function: called");
        let timer = Timer::new(timeout);
        while timer.running() {
            let envelope = self.recv(self.slice(&timer)).await;
            if envelope.matches(client, operation) {
                return Some(envelope);
            }
            if !envelope.is_null() {
                debug!(%client, %operation, got = ?envelope.operation(), "Broker::wait_for_function: discarded");
            }
        }
        error!(%client, %operation, "Timed out waiting for response");
        None
    }

    /// Like [`Broker::wait_for_function`], but a timeout is an error
    pub async fn require_function(
        &mut self,
        client: &str,
        operation: &str,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        self.wait_for_function(client, operation, timeout)
            .await
            .ok_or_else(|| BusError::ReplyTimeout {
                client: client.to_string(),
                operation: operation.to_string(),
            })
    }

    /// Send a command to one worker and wait for its reply
    pub async fn call(
        &mut self,
        client: &str,
        operation: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        debug!(%client, %operation, "Broker::call: called");
        self.send(client, operation, params, false);
        self.require_function(client, operation, timeout).await
    }

    /// Ping every worker until all of them report ready
    ///
    /// Pings go out immediately and then on every ping interval. A `loading` pong moves the
    /// sender to `loading`, a `success` pong to `ready`.
    pub async fn wait_for_all_ready(&mut self, timeout: Duration) -> Result<(), BusError> {
        debug!(workers = self.registry.len(), ?timeout, "Broker::wait_for_all_ready: called");
        let timer = Timer::new(timeout);
        let mut ping_timer = Timer::new(self.ping_interval);
        self.send(BROADCAST_TARGET, PING, Params::empty(), false);

        while timer.running() {
            if self.registry.all_in(WorkerState::Ready) {
                info!(workers = self.registry.len(), "All workers ready");
                return Ok(());
            }

            let envelope = self.recv(self.slice(&timer)).await;

            if ping_timer.finished() {
                ping_timer.reset();
                self.send(BROADCAST_TARGET, PING, Params::empty(), false);
            }

            self.handle_pong(&envelope);
        }

        if self.registry.all_in(WorkerState::Ready) {
            return Ok(());
        }
        let registry = self.registry.snapshot();
        error!(%registry, "Timed out waiting for workers to become ready");
        Err(BusError::ReadinessTimeout { registry })
    }

    /// Ask every worker to close and wait until all confirm
    pub async fn close(&mut self, timeout: Duration) -> Result<(), BusError> {
        debug!(workers = self.registry.len(), ?timeout, "Broker::close: called");
        let timer = Timer::new(timeout);
        self.send(BROADCAST_TARGET, CLOSE, Params::empty(), false);

        while timer.running() {
            if self.registry.all_in(WorkerState::Closed) {
                break;
            }

            let envelope = self.recv(self.slice(&timer)).await;
            if envelope.operation() == Some(CLOSE) && envelope.status == Status::Success {
                if let Some(name) = envelope.target() {
                    self.registry.advance(name, WorkerState::Closed);
                }
            }
        }

        if !self.registry.all_in(WorkerState::Closed) {
            let registry = self.registry.snapshot();
            error!(%registry, "Timed out waiting for workers to close");
            return Err(BusError::ShutdownTimeout { registry });
        }

        info!(workers = self.registry.len(), "All workers closed");
        self.reap_children().await;
        Ok(())
    }

    fn handle_pong(&mut self, envelope: &Envelope) {
        if envelope.operation() != Some(PING) || envelope.result != [Value::from(PONG)] {
            return;
        }
        let Some(name) = envelope.target() else {
            warn!("Pong without a sender name, ignored");
            return;
        };
        match envelope.status {
            Status::Loading => {
                self.registry.advance(name, WorkerState::Loading);
            }
            Status::Success => {
                self.registry.advance(name, WorkerState::Loading);
                self.registry.advance(name, WorkerState::Ready);
            }
            other => debug!(%name, status = %other, "Broker::handle_pong: ignored"),
        }
    }

    /// Poll slice bounded by both the poll interval and the time left
    fn slice(&self, timer: &Timer) -> Duration {
        self.poll_interval.min(timer.remaining())
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::MemoryBus;
    use crate::worker::{CommandTable, Worker};
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    fn context() -> Context {
        let mut config = Config::default();
        config.bus.poll_interval_ms = 5;
        config.bus.ping_interval_ms = 50;
        Context::new("main", config)
    }

    fn broker() -> (Broker, MemoryBus) {
        let (hub, bus) = MemoryBus::new(256);
        (Broker::with_hub(&context(), hub), bus)
    }

    fn adder() -> CommandTable {
        let mut table = CommandTable::new();
        table.register_fn("add", |(a, b): (i64, i64)| Ok(a + b)).unwrap();
        table
    }

    /// Spawn a worker on the in-process bus that announces itself and then runs
    fn spawn_worker(bus: &MemoryBus, name: &str) -> JoinHandle<()> {
        let mut worker = Worker::with_link(name, bus.link(), adder(), Duration::from_millis(5));
        tokio::spawn(async move {
            worker.announce_loading().await.unwrap();
            worker.run().await.unwrap();
        })
    }

    #[tokio::test]
    async fn test_send_assigns_sequential_ids() {
        let (mut broker, bus) = broker();
        let mut link = bus.link();
        let first = broker.send("w1", "add", Params::empty(), false);
        let second = broker.send("w1", "add", Params::empty(), false);
        assert_eq!(second, first + 1);

        let env = link.poll(WAIT).await.unwrap();
        assert_eq!(env.origin_server.as_deref(), Some("main"));
        assert_eq!(env.id, Some(first));
        assert_eq!(env.hops(), 1);
    }

    #[tokio::test]
    async fn test_recv_timeout_is_null() {
        let (mut broker, _bus) = broker();
        assert!(broker.recv(Duration::from_millis(10)).await.is_null());
    }

    #[tokio::test]
    async fn test_recv_blocking_gives_up() {
        let (mut broker, _bus) = broker();
        assert!(broker.recv_blocking(Duration::from_millis(30)).await.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_function_discards_other_traffic() {
        let (mut broker, bus) = broker();
        let mut link = bus.link();
        link.publish(&Envelope::request("w2", "add", Params::empty())).await.unwrap();
        link.publish(&Envelope::request("w1", "echo", Params::empty())).await.unwrap();
        link.publish(&Envelope::request("w1", "add", Params::empty())).await.unwrap();

        let env = broker.wait_for_function("w1", "add", WAIT).await.unwrap();
        assert!(env.matches("w1", "add"));
        assert_eq!(env.hops(), 1);
    }

    #[tokio::test]
    async fn test_require_function_times_out() {
        let (mut broker, _bus) = broker();
        let err = broker
            .require_function("w1", "add", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ReplyTimeout { .. }));
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (mut broker, bus) = broker();
        let _worker = spawn_worker(&bus, "w1");

        let reply = broker
            .call("w1", "add", Params::positional(vec![json!(2), json!(3)]), WAIT)
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Success);
        assert_eq!(reply.result, vec![json!(5)]);
        assert_eq!(reply.hops(), 4);
    }

    #[tokio::test]
    async fn test_wait_for_all_ready_walks_states_in_order() {
        let (mut broker, bus) = broker();
        broker.register_worker("w1");
        broker.register_worker("w2");
        let _w1 = spawn_worker(&bus, "w1");
        let _w2 = spawn_worker(&bus, "w2");

        broker.wait_for_all_ready(WAIT).await.unwrap();
        for name in ["w1", "w2"] {
            assert_eq!(
                broker.registry().path(name).unwrap(),
                &[WorkerState::NotStarted, WorkerState::Loading, WorkerState::Ready]
            );
        }
    }

    #[tokio::test]
    async fn test_wait_for_all_ready_timeout_carries_registry() {
        let (mut broker, bus) = broker();
        broker.register_worker("w1");
        broker.register_worker("silent");
        let _w1 = spawn_worker(&bus, "w1");

        let err = broker
            .wait_for_all_ready(Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            BusError::ReadinessTimeout { registry } => {
                assert_eq!(registry.get("w1"), Some(WorkerState::Ready));
                assert_eq!(registry.get("silent"), Some(WorkerState::NotStarted));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_pong_is_ignored() {
        let (mut broker, bus) = broker();
        broker.register_worker("w1");
        let _w1 = spawn_worker(&bus, "w1");
        let _stranger = spawn_worker(&bus, "stranger");

        broker.wait_for_all_ready(WAIT).await.unwrap();
        assert_eq!(broker.registry().len(), 1);
        assert_eq!(broker.registry().get("stranger"), None);
    }

    #[tokio::test]
    async fn test_close_marks_workers_closed() {
        let (mut broker, bus) = broker();
        broker.register_worker("w1");
        let w1 = spawn_worker(&bus, "w1");

        broker.wait_for_all_ready(WAIT).await.unwrap();
        broker.close(WAIT).await.unwrap();
        assert_eq!(broker.registry().get("w1"), Some(WorkerState::Closed));
        tokio::time::timeout(WAIT, w1).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_timeout_carries_registry() {
        let (mut broker, _bus) = broker();
        broker.register_worker("gone");
        let err = broker.close(Duration::from_millis(50)).await.unwrap_err();
        match err {
            BusError::ShutdownTimeout { registry } => {
                assert_eq!(registry.get("gone"), Some(WorkerState::NotStarted));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_is_ready_and_closed() {
        let (mut broker, _bus) = broker();
        broker.wait_for_all_ready(Duration::from_millis(50)).await.unwrap();
        broker.close(Duration::from_millis(50)).await.unwrap();
    }
}
