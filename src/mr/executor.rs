use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{future, StreamExt};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use crate::mr::{
    config::{ExecutorConfig, ExecutorMode},
    error::{Error, Result},
    function::Application,
    pipeline,
    rpc::{self, DoJobArgs, DoJobReply, ExecutorService, Phase, ShutdownReply},
    run_blocking,
};

/// Connections served at the same time
const MAX_CONNECTIONS: usize = 16;

/// Lets a shutdown reply reach the coordinator before the listener goes away
const REPLY_GRACE: Duration = Duration::from_millis(100);

/// Why an executor stopped serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Serving,
    ShutDown,
    /// Failure injection kicked in, or a task hit an I/O fault
    Crashed,
}

/// One worker process worth of state. Cloned into every request handler.
#[derive(Clone)]
pub struct Executor {
    config: Arc<ExecutorConfig>,
    app: Application,
    jobs_completed: Arc<AtomicUsize>,
    /// Set when the crash threshold is reached; the next request brings the executor down
    doomed: Arc<AtomicBool>,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, app: Application) -> Self {
        let doomed = config.mode == ExecutorMode::CrashAfter(0);
        let (lifecycle, _) = watch::channel(Lifecycle::Serving);
        Self {
            config: Arc::new(config),
            app,
            jobs_completed: Arc::new(AtomicUsize::new(0)),
            doomed: Arc::new(AtomicBool::new(doomed)),
            lifecycle: Arc::new(lifecycle),
        }
    }

    pub fn jobs_completed(&self) -> usize {
        self.jobs_completed.load(Ordering::SeqCst)
    }

    /// Leave the `Serving` state; the first reason given wins
    fn stop(&self, reason: Lifecycle) {
        self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Serving {
                *state = reason;
                true
            } else {
                false
            }
        });
    }

    async fn execute(&self, args: DoJobArgs) -> Result<()> {
        if args.num_other_phase == 0 {
            return Err(Error::InvalidJob(format!(
                "{} task {} was given no tasks in the other phase",
                args.operation, args.job_number
            )));
        }
        let app = self.app.clone();
        run_blocking(move || match args.operation {
            Phase::Map => pipeline::run_map(
                &args.file,
                args.job_number,
                args.num_other_phase,
                app.map_fn(),
            ),
            Phase::Reduce => pipeline::run_reduce(
                &args.file,
                args.job_number,
                args.num_other_phase,
                app.reduce_fn(),
            ),
        })
        .await
    }

    /// Bind the listener, register with the coordinator exactly once, and
    /// serve in the background until shutdown or a (simulated) crash.
    pub async fn start(self) -> Result<RunningExecutor> {
        let mut listener =
            tarpc::serde_transport::tcp::listen(self.config.listen.as_str(), Json::default)
                .await
                .map_err(|e| Error::rpc(&self.config.listen, e))?;
        listener.config_mut().max_frame_length(usize::MAX);
        let address = listener.local_addr().to_string();

        // The listener is already accepting, so the coordinator may dispatch right away
        let accepted =
            rpc::call_register(&self.config.coordinator, &address, self.config.rpc_timeout).await?;
        if !accepted {
            return Err(Error::Closed);
        }
        info!(
            %address,
            coordinator = %self.config.coordinator,
            app = self.app.name(),
            mode = ?self.config.mode,
            "executor registered"
        );

        let mut lifecycle = self.lifecycle.subscribe();
        let handler = self.clone();
        let task = tokio::spawn(async move {
            let serving = listener
                // Ignore accept errors
                .filter_map(|r| future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .map(move |channel| channel.execute(handler.clone().serve()))
                .buffer_unordered(MAX_CONNECTIONS)
                .for_each(|_| async {});
            // Dropping `serving` closes the listener and every open connection at once
            tokio::select! {
                _ = serving => Lifecycle::ShutDown,
                state = lifecycle.wait_for(|s| *s != Lifecycle::Serving) => {
                    state.map(|s| *s).unwrap_or(Lifecycle::ShutDown)
                }
            }
        });

        Ok(RunningExecutor {
            address,
            executor: self,
            task,
        })
    }
}

#[tarpc::server]
impl ExecutorService for Executor {
    async fn do_job(self, _: context::Context, args: DoJobArgs) -> DoJobReply {
        if self.doomed.load(Ordering::SeqCst) {
            warn!("crash threshold reached, executor stops responding");
            self.stop(Lifecycle::Crashed);
            return future::pending().await;
        }

        info!(phase = %args.operation, task = args.job_number, "running task");
        if let Err(e) = self.execute(args).await {
            // Same as a dead process from the coordinator's side: the call never completes
            error!(error = %e, "task failed, executor halting");
            self.stop(Lifecycle::Crashed);
            return future::pending().await;
        }

        let done = self.jobs_completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let ExecutorMode::CrashAfter(limit) = self.config.mode {
            if done >= limit {
                self.doomed.store(true, Ordering::SeqCst);
            }
        }
        DoJobReply
    }

    async fn shutdown(self, _: context::Context) -> ShutdownReply {
        if self.doomed.load(Ordering::SeqCst) {
            self.stop(Lifecycle::Crashed);
            return future::pending().await;
        }

        let jobs_completed = self.jobs_completed();
        info!(jobs_completed, "shutdown requested");
        let executor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REPLY_GRACE).await;
            executor.stop(Lifecycle::ShutDown);
        });
        ShutdownReply { jobs_completed }
    }
}

/// Handle to an executor serving in the background
pub struct RunningExecutor {
    address: String,
    executor: Executor,
    task: JoinHandle<Lifecycle>,
}

impl RunningExecutor {
    /// The address registered with the coordinator
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn jobs_completed(&self) -> usize {
        self.executor.jobs_completed()
    }

    /// Drop off the network immediately, like a killed process
    pub fn kill(&self) {
        self.executor.stop(Lifecycle::Crashed);
    }

    /// Wait until the executor stops serving
    pub async fn wait(self) -> (Lifecycle, usize) {
        let reason = self.task.await.unwrap_or(Lifecycle::Crashed);
        (reason, self.executor.jobs_completed())
    }
}
