//! Per-process log file setup
//!
//! Each participant (broker, every worker) writes its own `<process>.log` under the log
//! directory so the traffic of one process can be read without interleaving.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use tracing::{debug, info};

/// Parse a level name, falling back to INFO for unknown names
pub fn parse_level(level: Option<&str>) -> tracing::Level {
    let Some(s) = level else {
        return tracing::Level::INFO;
    };
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

/// Path of the log file for `process`
pub fn log_path(dir: &Path, process: &str) -> PathBuf {
    dir.join(format!("{}.log", process))
}

/// Install the global subscriber writing to `<dir>/<process>.log`
///
/// Level priority is decided by the caller: CLI > config file > INFO default.
pub fn init(process: &str, level: Option<&str>, dir: &Path) -> Result<PathBuf> {
    // Note: Can't log params here since logging isn't initialized yet
    fs::create_dir_all(dir).context("Failed to create log directory")?;

    let level = parse_level(level);
    let path = log_path(dir, process);
    let log_file = fs::File::create(&path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

    info!("Start of {} log (level: {:?})", process, level);
    debug!(path = %path.display(), "logging::init: log file ready");
    Ok(path)
}
