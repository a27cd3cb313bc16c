//! Messages and tarpc services exchanged between the coordinator and its executors.
//!
//! Every call opens its own connection, so a dead executor shows up as a
//! refused connect, a dropped connection, or an exceeded deadline.

use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use tarpc::{client, context, tokio_serde::formats::Json};

use crate::mr::{
    error::{self, Error},
    pipeline::Job,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Map,
    Reduce,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Map => write!(f, "map"),
            Phase::Reduce => write!(f, "reduce"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoJobArgs {
    /// The job's input path; every file the task touches is named after it
    pub file: PathBuf,
    pub operation: Phase,
    pub job_number: usize,
    /// Reduce count for a map task, map count for a reduce task
    pub num_other_phase: usize,
}

/// Empty acknowledgement, failures surface as transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoJobReply;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub jobs_completed: usize,
}

/// Where the coordinator's current run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    WaitingForJob,
    Splitting,
    MapPhase,
    ReducePhase,
    Merging,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub address: String,
    pub alive: bool,
    pub jobs_completed: usize,
}

/// Enough of the scheduler's bookkeeping to tell a slow phase from a stuck one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub stage: Stage,
    pub job: Option<Job>,
    pub pending_tasks: usize,
    pub in_flight_tasks: usize,
    pub completed_tasks: usize,
    pub stage_elapsed_ms: u64,
    pub completed_runs: u64,
    /// Why the most recent run failed; cleared by a successful run
    pub last_error: Option<String>,
    pub executors: Vec<ExecutorStatus>,
}

/// How one submitted run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub job: Job,
    /// Path of the merged output, or why the run was abandoned
    pub result: Result<PathBuf, String>,
}

/// One executor's answer to the final shutdown broadcast, `None` if it never answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorReport {
    pub address: String,
    pub jobs_completed: Option<usize>,
}

/// RPC surface of the coordinator
#[tarpc::service]
pub trait CoordinatorService {
    /// An executor announces the address it serves `DoJob` on
    async fn register(address: String) -> bool;
    /// Queue a job and return its run number, counting from 1; `None` if it
    /// is malformed or the coordinator is closing
    async fn submit_job(job: Job) -> Option<usize>;
    /// Snapshot of the scheduler for operators
    async fn status() -> CoordinatorStatus;
    /// How run `run` ended, `None` while it is queued or in progress
    async fn run_outcome(run: usize) -> Option<RunOutcome>;
    /// Stop every executor, then the coordinator itself
    async fn shutdown() -> Vec<ExecutorReport>;
}

/// RPC surface of an executor
#[tarpc::service]
pub trait ExecutorService {
    /// Run one map or one reduce task
    async fn do_job(args: DoJobArgs) -> DoJobReply;
    /// Report the number of finished jobs and exit
    async fn shutdown() -> ShutdownReply;
}

/// A context whose deadline is `timeout` from now
pub fn deadline(timeout: Duration) -> context::Context {
    let mut ctx = context::current();
    ctx.deadline = SystemTime::now() + timeout;
    ctx
}

pub async fn connect_coordinator(address: &str, timeout: Duration) -> error::Result<CoordinatorServiceClient> {
    let transport = tokio::time::timeout(
        timeout,
        tarpc::serde_transport::tcp::connect(address, Json::default),
    )
    .await
    .map_err(|_| Error::rpc(address, "connect timed out"))?
    .map_err(|e| Error::rpc(address, e))?;
    Ok(CoordinatorServiceClient::new(client::Config::default(), transport).spawn())
}

pub async fn connect_executor(address: &str, timeout: Duration) -> error::Result<ExecutorServiceClient> {
    let transport = tokio::time::timeout(
        timeout,
        tarpc::serde_transport::tcp::connect(address, Json::default),
    )
    .await
    .map_err(|_| Error::rpc(address, "connect timed out"))?
    .map_err(|e| Error::rpc(address, e))?;
    Ok(ExecutorServiceClient::new(client::Config::default(), transport).spawn())
}

/// Ask `executor` to run one task, failing on any transport problem or on timeout
pub async fn call_do_job(executor: &str, args: DoJobArgs, timeout: Duration) -> error::Result<()> {
    let client = connect_executor(executor, timeout).await?;
    client
        .do_job(deadline(timeout), args)
        .await
        .map_err(|e| Error::rpc(executor, e))?;
    Ok(())
}

pub async fn call_shutdown(executor: &str, timeout: Duration) -> error::Result<usize> {
    let client = connect_executor(executor, timeout).await?;
    let reply = client
        .shutdown(deadline(timeout))
        .await
        .map_err(|e| Error::rpc(executor, e))?;
    Ok(reply.jobs_completed)
}

pub async fn call_register(coordinator: &str, address: &str, timeout: Duration) -> error::Result<bool> {
    let client = connect_coordinator(coordinator, timeout).await?;
    client
        .register(deadline(timeout), address.to_string())
        .await
        .map_err(|e| Error::rpc(coordinator, e))
}
