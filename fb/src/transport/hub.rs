//! Hub - the broker's end of the bus
//!
//! The hub binds both bus endpoints. Everything published through it is fanned out to every
//! connected subscriber; everything any worker publishes lands in a single inbound queue.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufWriter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use super::frame::{pump_frames, write_frame};
use crate::config::BusConfig;
use crate::envelope::Envelope;
use crate::error::BusError;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Broker side of the bus
pub struct Hub {
    down: broadcast::Sender<Envelope>,
    up: mpsc::Receiver<Envelope>,
    send_port: u16,
    recv_port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Bind both endpoints described by `bus`
    ///
    /// Port 0 picks an ephemeral port; [`Hub::ports`] reports what was bound.
    pub async fn bind(bus: &BusConfig) -> Result<Self, BusError> {
        debug!(send = %bus.send_endpoint(), recv = %bus.recv_endpoint(), "Hub::bind: called");
        let publish_listener = bind_listener(&bus.send_endpoint()).await?;
        let receive_listener = bind_listener(&bus.recv_endpoint()).await?;

        let send_port = publish_listener.local_addr()?.port();
        let recv_port = receive_listener.local_addr()?.port();

        let (down, _) = broadcast::channel(bus.channel_capacity);
        let (up_tx, up) = mpsc::channel(bus.channel_capacity);

        let tasks = vec![
            tokio::spawn(serve_subscribers(publish_listener, down.clone(), bus.max_frame_bytes)),
            tokio::spawn(serve_publishers(receive_listener, up_tx, bus.max_frame_bytes)),
        ];

        info!(send_port, recv_port, "Bus hub bound");
        Ok(Self {
            down,
            up,
            send_port,
            recv_port,
            tasks,
        })
    }

    /// Assemble a hub over existing channels (in-process bus)
    pub(crate) fn from_channels(down: broadcast::Sender<Envelope>, up: mpsc::Receiver<Envelope>) -> Self {
        Self {
            down,
            up,
            send_port: 0,
            recv_port: 0,
            tasks: Vec::new(),
        }
    }

    /// Bound `(send_port, recv_port)`; both zero for an in-process bus
    pub fn ports(&self) -> (u16, u16) {
        (self.send_port, self.recv_port)
    }

    /// Number of workers currently subscribed
    pub fn subscriber_count(&self) -> usize {
        self.down.receiver_count()
    }

    /// Publish to every subscriber, returning how many will see it
    ///
    /// Fire-and-forget: with no subscribers the envelope is dropped.
    pub fn publish(&self, envelope: Envelope) -> usize {
        match self.down.send(envelope) {
            Ok(n) => n,
            Err(_) => {
                debug!("Hub::publish: no subscribers, envelope dropped");
                0
            }
        }
    }

    /// Wait up to `timeout` for the next inbound envelope
    pub async fn poll(&mut self, timeout: Duration) -> Option<Envelope> {
        match tokio::time::timeout(timeout, self.up.recv()).await {
            Ok(Some(envelope)) => Some(envelope),
            Ok(None) => {
                // Every publisher is gone; keep the caller's pacing instead of spinning
                tokio::time::sleep(timeout).await;
                None
            }
            Err(_) => None,
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn bind_listener(address: &str) -> Result<TcpListener, BusError> {
    TcpListener::bind(address).await.map_err(|source| BusError::Bind {
        address: address.to_string(),
        source,
    })
}

/// Accept workers on the publish endpoint and give each its own broadcast receiver
async fn serve_subscribers(listener: TcpListener, down: broadcast::Sender<Envelope>, max_frame_bytes: usize) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "serve_subscribers: subscriber connected");
                    let rx = down.subscribe();
                    connections.spawn(forward_to_subscriber(stream, rx, peer, max_frame_bytes));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept subscriber");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn forward_to_subscriber(
    stream: TcpStream,
    mut rx: broadcast::Receiver<Envelope>,
    peer: SocketAddr,
    max_frame_bytes: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "forward_to_subscriber: set_nodelay failed");
    }
    let mut writer = BufWriter::new(stream);

    loop {
        match rx.recv().await {
            Ok(envelope) => match write_frame(&mut writer, &envelope, max_frame_bytes).await {
                Ok(()) => trace!(%peer, "sent frame {}", envelope),
                Err(BusError::FrameTooLarge { size, max }) => {
                    warn!(%peer, size, max, "Envelope too large for the bus, dropped");
                }
                Err(e) => {
                    debug!(%peer, error = %e, "forward_to_subscriber: subscriber gone");
                    break;
                }
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(%peer, skipped, "Subscriber lagged, envelopes dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Accept workers on the receive endpoint and funnel their frames into one queue
async fn serve_publishers(listener: TcpListener, up: mpsc::Sender<Envelope>, max_frame_bytes: usize) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "serve_publishers: publisher connected");
                    connections.spawn(pump_frames(stream, up.clone(), peer, max_frame_bytes));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept publisher");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}
