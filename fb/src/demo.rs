//! Reference coordinator: spawns workers, waits for them, fans out `add`, closes
//!
//! Used by `fb demo`. Workers run either in-process on the broker's runtime or as `fb worker`
//! subprocesses.

use std::path::{Path, PathBuf};

use colored::Colorize;
use eyre::{Context as _, Result, bail, eyre};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::context::Context;
use crate::envelope::{Envelope, Status};
use crate::machine::{Machine, State, Transition};
use crate::params::Params;
use crate::sample::arithmetic_commands;
use crate::state;
use crate::worker::Worker;

/// How many times the readiness handshake is attempted before the demo gives up
const READY_ATTEMPTS: u32 = 2;

/// Where the demo's workers come from
#[derive(Debug, Clone)]
pub enum WorkerSource {
    /// Tasks on the coordinator's own runtime
    InProcess,
    /// `fb worker` subprocesses of the given executable
    External(PathBuf),
}

/// One line of demo output
#[derive(Debug, Clone, PartialEq)]
pub struct DemoResult {
    pub worker: String,
    pub args: Vec<Value>,
    pub status: Status,
    pub result: Vec<Value>,
}

/// The demo coordinator state machine
pub struct Demo {
    ctx: Context,
    broker: Broker,
    workers: Vec<String>,
    source: WorkerSource,
    started: bool,
    attempts: u32,
    results: Vec<DemoResult>,
}

impl Demo {
    pub fn new(ctx: Context, broker: Broker, workers: usize, source: WorkerSource) -> Self {
        debug!(workers, ?source, "Demo::new: called");
        Self {
            ctx,
            broker,
            workers: (1..=workers).map(|i| format!("worker{}", i)).collect(),
            source,
            started: false,
            attempts: 0,
            results: Vec::new(),
        }
    }

    pub fn results(&self) -> &[DemoResult] {
        &self.results
    }

    async fn start_state(&mut self, _params: Params) -> Result<Transition<Self>> {
        if !self.started {
            self.spawn_workers()?;
            self.started = true;
        }
        if self.attempts >= READY_ATTEMPTS {
            bail!("Workers did not become ready after {} attempts", self.attempts);
        }
        self.attempts += 1;
        Ok(Transition::to(state!(Self::wait_for_workers_state)))
    }

    async fn wait_for_workers_state(&mut self, _params: Params) -> Result<Transition<Self>> {
        let timeout = self.ctx.config().timeouts.ready();
        self.broker.wait_for_all_ready(timeout).await?;
        info!(workers = self.workers.len(), "Demo workers ready");
        Ok(Transition::with_args(state!(Self::compute_state), vec![json!(0)]))
    }

    /// Asks the worker at index `args[0]` to add `index + 1` and `10 * (index + 1)`
    async fn compute_state(&mut self, params: Params) -> Result<Transition<Self>> {
        let index: usize = params.arg(0)?;
        let Some(worker) = self.workers.get(index).cloned() else {
            return Ok(Transition::to(state!(Self::shutdown_state)));
        };

        let n = index as i64 + 1;
        let args = vec![json!(n), json!(n * 10)];
        let timeout = self.ctx.config().timeouts.call();
        let reply = self
            .broker
            .call(&worker, "add", Params::positional(args.clone()), timeout)
            .await?;
        self.report(&worker, args, &reply);

        Ok(Transition::with_args(state!(Self::compute_state), vec![json!(index + 1)]))
    }

    async fn shutdown_state(&mut self, _params: Params) -> Result<Transition<Self>> {
        let timeout = self.ctx.config().timeouts.close();
        self.close(timeout).await?;
        println!("{} {} workers closed", "done".green().bold(), self.workers.len());
        Ok(Transition::stop())
    }

    fn spawn_workers(&mut self) -> Result<()> {
        let names = self.workers.clone();
        match self.source.clone() {
            WorkerSource::InProcess => {
                for name in names {
                    let base = self.ctx.config().clone();
                    self.broker.start_worker_process(
                        move |send_port, recv_port, name| async move {
                            let ctx = Context::new(name, base).with_ports(send_port, recv_port);
                            let mut worker = Worker::connect(&ctx, arithmetic_commands()?).await?;
                            worker.run().await
                        },
                        &name,
                    );
                }
            }
            WorkerSource::External(executable) => {
                let (folder, file) = split_executable(&executable)?;
                for name in names {
                    self.broker
                        .start_subprocess_with_args(&file, ["worker"], &folder, &name)
                        .context(format!("Failed to start {}", name))?;
                }
            }
        }
        Ok(())
    }

    fn report(&mut self, worker: &str, args: Vec<Value>, reply: &Envelope) {
        let shown: Vec<String> = args.iter().map(Value::to_string).collect();
        let result: Vec<String> = reply.result.iter().map(Value::to_string).collect();
        if reply.status == Status::Success {
            println!(
                "{} add({}) = {}",
                worker.cyan(),
                shown.join(", "),
                result.join(", ").green()
            );
        } else {
            warn!(%worker, status = %reply.status, "add did not succeed");
            println!("{} add({}) {}", worker.cyan(), shown.join(", "), reply.status.to_string().red());
        }
        self.results.push(DemoResult {
            worker: worker.to_string(),
            args,
            status: reply.status,
            result: reply.result.clone(),
        });
    }
}

impl Machine for Demo {
    fn broker(&mut self) -> &mut Broker {
        &mut self.broker
    }

    fn main_state(&self) -> State<Self> {
        state!(Self::start_state)
    }
}

/// Split an executable path into its folder and file name
fn split_executable(executable: &Path) -> Result<(PathBuf, PathBuf)> {
    let file = executable
        .file_name()
        .ok_or_else(|| eyre!("Not an executable path: {}", executable.display()))?;
    let folder = match executable.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((folder, PathBuf::from(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::machine::Runner;

    fn context() -> Context {
        let mut config = Config::default();
        config.bus = config.bus.with_ports(0, 0);
        config.bus.poll_interval_ms = 5;
        config.bus.ping_interval_ms = 50;
        config.timeouts.ready_ms = 5_000;
        config.timeouts.close_ms = 5_000;
        config.timeouts.call_ms = 5_000;
        Context::new("main", config)
    }

    #[test]
    fn test_split_executable() {
        let (folder, file) = split_executable(Path::new("/usr/local/bin/fb")).unwrap();
        assert_eq!(folder, PathBuf::from("/usr/local/bin"));
        assert_eq!(file, PathBuf::from("fb"));

        let (folder, file) = split_executable(Path::new("fb")).unwrap();
        assert_eq!(folder, PathBuf::from("."));
        assert_eq!(file, PathBuf::from("fb"));
    }

    #[tokio::test]
    async fn test_demo_in_process() {
        let ctx = context();
        let broker = Broker::bind(&ctx).await.unwrap();
        let mut runner = Runner::new(Demo::new(ctx, broker, 2, WorkerSource::InProcess));
        runner.run().await.unwrap();

        let results = runner.machine().results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].worker, "worker1");
        assert_eq!(results[0].result, vec![json!(11)]);
        assert_eq!(results[1].worker, "worker2");
        assert_eq!(results[1].result, vec![json!(22)]);
        assert!(results.iter().all(|r| r.status == Status::Success));
    }

    #[tokio::test]
    async fn test_demo_fails_when_workers_cannot_spawn() {
        let ctx = context();
        let broker = Broker::bind(&ctx).await.unwrap();
        let missing = PathBuf::from("/nonexistent/fb");
        let mut runner = Runner::new(Demo::new(ctx, broker, 1, WorkerSource::External(missing)));
        assert!(runner.run().await.is_err());
    }

    #[tokio::test]
    async fn test_demo_retries_readiness_then_fails() {
        let mut config = context().config().clone();
        config.timeouts.ready_ms = 100;
        let ctx = Context::new("main", config);
        let broker = Broker::bind(&ctx).await.unwrap();
        let mut demo = Demo::new(ctx, broker, 1, WorkerSource::InProcess);
        // Pretend the worker was launched but never comes up
        demo.started = true;
        demo.broker.register_worker("worker1");

        let mut runner = Runner::new(demo);
        let err = runner.run().await.unwrap_err();
        assert!(format!("{err:?}").contains("did not become ready"));
        assert_eq!(runner.machine().attempts, READY_ATTEMPTS);
    }
}
