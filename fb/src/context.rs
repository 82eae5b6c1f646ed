//! Per-process context handed to every bus component

use std::time::Duration;

use tracing::debug;

use crate::config::{BusConfig, Config};

/// Participant name plus the configuration it runs with
///
/// Built once per process (after logging is initialized) and passed by reference to the
/// broker, workers and state machines.
#[derive(Debug, Clone)]
pub struct Context {
    name: String,
    config: Config,
}

impl Context {
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let name = name.into();
        debug!(%name, "Context::new: called");
        Self { name, config }
    }

    /// This participant's name on the bus
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &BusConfig {
        &self.config.bus
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.bus.poll_interval()
    }

    /// Context for another participant sharing this configuration
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.config.clone())
    }

    /// Same context with the bus moved to other ports
    pub fn with_ports(&self, send_port: u16, recv_port: u16) -> Self {
        let mut config = self.config.clone();
        config.bus = config.bus.with_ports(send_port, recv_port);
        Self {
            name: self.name.clone(),
            config,
        }
    }
}
