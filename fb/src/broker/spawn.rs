//! Launching workers as subprocesses or in-process tasks
//!
//! The broker registers every launched worker as `not_started` and does not supervise it
//! afterwards. A worker that dies is only noticed when a later barrier wait times out.

use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::core::Broker;
use crate::error::BusError;

/// Environment variable carrying the worker's name
pub const ENV_WORKER_NAME: &str = "FLEETBUS_WORKER_NAME";

/// Environment variable carrying the broker's publish port
pub const ENV_SEND_PORT: &str = "FLEETBUS_SEND_PORT";

/// Environment variable carrying the broker's receive port
pub const ENV_RECV_PORT: &str = "FLEETBUS_RECV_PORT";

/// How long a closed subprocess gets to exit before it is left to `kill_on_drop`
const REAP_GRACE: Duration = Duration::from_secs(2);

impl Broker {
    /// Launch `folder/executable` with `folder` as working directory
    pub fn start_subprocess(
        &mut self,
        executable: impl AsRef<Path>,
        folder: impl AsRef<Path>,
        name: &str,
    ) -> Result<(), BusError> {
        self.start_subprocess_with_args(executable, std::iter::empty::<&str>(), folder, name)
    }

    /// Launch `folder/executable` with extra command-line arguments
    ///
    /// The bus coordinates are exported through [`ENV_WORKER_NAME`], [`ENV_SEND_PORT`] and
    /// [`ENV_RECV_PORT`].
    pub fn start_subprocess_with_args<I, S>(
        &mut self,
        executable: impl AsRef<Path>,
        args: I,
        folder: impl AsRef<Path>,
        name: &str,
    ) -> Result<(), BusError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let folder = folder.as_ref();
        let path = folder.join(executable.as_ref());
        debug!(%name, path = %path.display(), "Broker::start_subprocess: called");

        let (send_port, recv_port) = self.ports();
        let child = Command::new(&path)
            .args(args)
            .current_dir(folder)
            .env(ENV_WORKER_NAME, name)
            .env(ENV_SEND_PORT, send_port.to_string())
            .env(ENV_RECV_PORT, recv_port.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BusError::Spawn {
                name: name.to_string(),
                source,
            })?;

        info!(%name, pid = ?child.id(), "Started worker subprocess");
        self.register_worker(name);
        self.children.push(child);
        Ok(())
    }

    /// Run an in-process worker entry point as a task
    ///
    /// `entry` receives `(send_port, recv_port, name)`, the same coordinates a subprocess gets.
    pub fn start_worker_process<F, Fut>(&mut self, entry: F, name: &str)
    where
        F: FnOnce(u16, u16, String) -> Fut,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        debug!(%name, "Broker::start_worker_process: called");
        let (send_port, recv_port) = self.ports();
        let future = entry(send_port, recv_port, name.to_string());
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = future.await {
                error!(name = %task_name, "Worker task failed: {:?}", e);
            }
        });

        info!(%name, "Started in-process worker");
        self.register_worker(name);
        self.tasks.push(task);
    }

    /// Wait briefly for closed subprocesses to exit
    pub(super) async fn reap_children(&mut self) {
        for mut child in self.children.drain(..) {
            match tokio::time::timeout(REAP_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "Broker::reap_children: worker exited"),
                Ok(Err(e)) => warn!(error = %e, "Failed to wait for worker subprocess"),
                Err(_) => warn!(pid = ?child.id(), "Worker subprocess did not exit after close"),
            }
        }
    }
}
