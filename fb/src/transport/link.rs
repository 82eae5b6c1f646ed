//! Link - a worker's end of the bus
//!
//! Mirrors the hub's socket roles: the link subscribes to the hub's publish endpoint and
//! publishes to the hub's receive endpoint.

use std::time::Duration;

use tokio::io::BufWriter;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::frame::{pump_frames, write_frame};
use crate::config::BusConfig;
use crate::envelope::Envelope;
use crate::error::BusError;
use crate::timer::Timer;

/// Pause between connection attempts while the broker is not up yet
const CONNECT_RETRY: Duration = Duration::from_millis(50);

pub(crate) enum Uplink {
    Tcp(BufWriter<TcpStream>),
    Memory(mpsc::Sender<Envelope>),
}

/// Worker side of the bus
pub struct Link {
    down: mpsc::Receiver<Envelope>,
    up: Uplink,
    tasks: Vec<JoinHandle<()>>,
    max_frame_bytes: usize,
}

impl Link {
    /// Connect to a broker's hub, retrying until the connect timeout
    pub async fn connect(bus: &BusConfig) -> Result<Self, BusError> {
        debug!(send = %bus.send_endpoint(), recv = %bus.recv_endpoint(), "Link::connect: called");
        let inbound = connect_with_retry(&bus.send_endpoint(), bus.connect_timeout()).await?;
        let outbound = connect_with_retry(&bus.recv_endpoint(), bus.connect_timeout()).await?;

        let peer = inbound.peer_addr()?;
        let (tx, down) = mpsc::channel(bus.channel_capacity);
        let task = tokio::spawn(pump_frames(inbound, tx, peer, bus.max_frame_bytes));

        info!(send = %bus.send_endpoint(), recv = %bus.recv_endpoint(), "Connected to bus");
        Ok(Self {
            down,
            up: Uplink::Tcp(BufWriter::new(outbound)),
            tasks: vec![task],
            max_frame_bytes: bus.max_frame_bytes,
        })
    }

    pub(crate) fn from_parts(
        down: mpsc::Receiver<Envelope>,
        up: Uplink,
        tasks: Vec<JoinHandle<()>>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            down,
            up,
            tasks,
            max_frame_bytes,
        }
    }

    /// Publish one envelope towards the broker
    pub async fn publish(&mut self, envelope: &Envelope) -> Result<(), BusError> {
        match &mut self.up {
            Uplink::Tcp(writer) => write_frame(writer, envelope, self.max_frame_bytes).await,
            Uplink::Memory(tx) => tx.send(envelope.clone()).await.map_err(|_| BusError::Closed),
        }
    }

    /// Wait up to `timeout` for the next broadcast envelope
    pub async fn poll(&mut self, timeout: Duration) -> Option<Envelope> {
        match tokio::time::timeout(timeout, self.down.recv()).await {
            Ok(Some(envelope)) => Some(envelope),
            Ok(None) => {
                // Broker is gone; keep the caller's pacing instead of spinning
                tokio::time::sleep(timeout).await;
                None
            }
            Err(_) => None,
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn connect_with_retry(address: &str, timeout: Duration) -> Result<TcpStream, BusError> {
    let timer = Timer::new(timeout);
    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%address, error = %e, "connect_with_retry: set_nodelay failed");
                }
                return Ok(stream);
            }
            Err(source) if timer.finished() => {
                return Err(BusError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
            Err(e) => {
                debug!(%address, error = %e, "connect_with_retry: broker not reachable yet");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::transport::Hub;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_fails_without_broker() {
        // Grab a free port and release it so nothing is listening there
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let bus = BusConfig {
            connect_timeout_ms: 100,
            ..BusConfig::default().with_ports(port, port)
        };
        let err = Link::connect(&bus).await.err().unwrap();
        assert!(matches!(err, BusError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_link_and_hub_exchange() {
        let mut hub = Hub::bind(&BusConfig::default().with_ports(0, 0)).await.unwrap();
        let (send_port, recv_port) = hub.ports();
        let mut link = Link::connect(&BusConfig::default().with_ports(send_port, recv_port))
            .await
            .unwrap();

        let up = Envelope::request("w1", "ping", Params::empty());
        link.publish(&up).await.unwrap();
        let got = hub.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got, up);

        for _ in 0..100 {
            if hub.subscriber_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let down = Envelope::request("all", "add", Params::positional(vec![json!(1), json!(2)]));
        hub.publish(down.clone());
        let got = link.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got, down);
    }
}
