//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fleetbus - broker and workers on a broadcast bus
#[derive(Parser)]
#[command(
    name = "fb",
    about = "Broadcast message bus for a broker and a small fleet of workers",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the reference worker (add, echo, sleep_ms, fail) until the broker closes it
    Worker {
        /// Worker name on the bus
        #[arg(short, long, env = "FLEETBUS_WORKER_NAME")]
        name: String,

        /// Broker publish port (overrides config)
        #[arg(long, env = "FLEETBUS_SEND_PORT")]
        send_port: Option<u16>,

        /// Broker receive port (overrides config)
        #[arg(long, env = "FLEETBUS_RECV_PORT")]
        recv_port: Option<u16>,
    },

    /// Run the reference coordinator: spawn workers, call add on each, close
    Demo {
        /// Number of workers to spawn
        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        /// Spawn workers as subprocesses of this executable instead of in-process
        #[arg(short, long, value_name = "PATH")]
        external: Option<PathBuf>,

        /// Broker publish port (overrides config, 0 picks a free port)
        #[arg(long)]
        send_port: Option<u16>,

        /// Broker receive port (overrides config, 0 picks a free port)
        #[arg(long)]
        recv_port: Option<u16>,
    },
}
