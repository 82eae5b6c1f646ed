//! Fleetbus - broker and workers on a broadcast bus
//!
//! CLI entry point for running the reference worker and the demo coordinator.

use clap::Parser;
use eyre::{Context as _, Result};
use tracing::{debug, info};

use fleetbus::broker::Broker;
use fleetbus::cli::{Cli, Command};
use fleetbus::config::Config;
use fleetbus::context::Context;
use fleetbus::demo::{Demo, WorkerSource};
use fleetbus::logging;
use fleetbus::machine::Runner;
use fleetbus::sample::arithmetic_commands;
use fleetbus::worker::Worker;

/// Process name of the coordinator on the bus and in its log file
const BROKER_NAME: &str = "main";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let process = match &cli.command {
        Command::Worker { name, .. } => name.clone(),
        Command::Demo { .. } => BROKER_NAME.to_string(),
    };

    // Read the logging section early (before full config load) so load warnings reach the log
    let log_config = Config::load_log_config(cli.config.as_ref());

    // Log level priority: CLI > config > INFO default
    let level = cli.log_level.clone().or_else(|| log_config.level.clone());
    let log_path = logging::init(&process, level.as_deref(), &log_config.dir()).context("Failed to setup logging")?;
    debug!(log = %log_path.display(), "main: logging ready");

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Worker {
            name,
            send_port,
            recv_port,
        } => {
            debug!(%name, ?send_port, ?recv_port, "main: matched Worker command");
            override_ports(&mut config, send_port, recv_port);
            cmd_worker(Context::new(name, config)).await
        }
        Command::Demo {
            workers,
            external,
            send_port,
            recv_port,
        } => {
            debug!(workers, ?external, "main: matched Demo command");
            override_ports(&mut config, send_port, recv_port);
            let source = match external {
                Some(path) => WorkerSource::External(path),
                None => WorkerSource::InProcess,
            };
            cmd_demo(Context::new(BROKER_NAME, config), workers, source).await
        }
    }
}

fn override_ports(config: &mut Config, send_port: Option<u16>, recv_port: Option<u16>) {
    let send_port = send_port.unwrap_or(config.bus.send_port);
    let recv_port = recv_port.unwrap_or(config.bus.recv_port);
    config.bus = config.bus.with_ports(send_port, recv_port);
}

async fn cmd_worker(ctx: Context) -> Result<()> {
    info!(name = %ctx.name(), send = %ctx.bus().send_endpoint(), recv = %ctx.bus().recv_endpoint(), "Starting worker");
    let commands = arithmetic_commands()?;
    let mut worker = Worker::connect(&ctx, commands)
        .await
        .context("Failed to connect to broker")?;
    worker.run().await
}

async fn cmd_demo(ctx: Context, workers: usize, source: WorkerSource) -> Result<()> {
    let broker = Broker::bind(&ctx).await.context("Failed to bind bus")?;
    let (send_port, recv_port) = broker.ports();
    info!(send_port, recv_port, workers, "Starting demo coordinator");

    let mut runner = Runner::new(Demo::new(ctx, broker, workers, source));
    runner.run().await
}
