//! Broker side of the bus

mod core;
mod spawn;

pub use self::core::Broker;
pub use spawn::{ENV_RECV_PORT, ENV_SEND_PORT, ENV_WORKER_NAME};
