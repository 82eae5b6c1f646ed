//! In-process bus with the same hub/link surfaces as the TCP transport

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::hub::Hub;
use super::link::{Link, Uplink};
use crate::envelope::Envelope;

/// Factory for links attached to an in-process hub
#[derive(Clone)]
pub struct MemoryBus {
    down: broadcast::Sender<Envelope>,
    up: mpsc::Sender<Envelope>,
    capacity: usize,
}

impl MemoryBus {
    /// Create a hub and the bus that hands out links to it
    pub fn new(capacity: usize) -> (Hub, Self) {
        debug!(capacity, "MemoryBus::new: called");
        let (down, _) = broadcast::channel(capacity);
        let (up, up_rx) = mpsc::channel(capacity);
        let hub = Hub::from_channels(down.clone(), up_rx);
        (hub, Self { down, up, capacity })
    }

    /// Attach a new worker link; it sees every envelope published from now on
    pub fn link(&self) -> Link {
        let mut rx = self.down.subscribe();
        let (tx, down_rx) = mpsc::channel(self.capacity);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "In-process subscriber lagged, envelopes dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Link::from_parts(down_rx, Uplink::Memory(self.up.clone()), vec![task], usize::MAX)
    }
}
