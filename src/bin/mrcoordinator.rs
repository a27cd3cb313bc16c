use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use map_reduce_rs::mr::{
    config::{SchedulerConfig, DEFAULT_COORDINATOR_ADDRESS},
    coordinator::Coordinator,
    pipeline::Job,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Start the coordinator RPC server and schedule submitted jobs until shut down.
///
/// With `--input`, the coordinator runs that one job itself, then shuts down
/// every executor and exits.
#[derive(Parser)]
#[command(name = "mrcoordinator")]
struct Args {
    /// Address the coordinator RPC server listens on
    #[arg(long, default_value = DEFAULT_COORDINATOR_ADDRESS)]
    listen: String,
    /// Per-call timeout for coordinator -> executor RPCs, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    rpc_timeout_ms: u64,
    /// Warn when a phase makes no progress for this many seconds
    #[arg(long, default_value_t = 30)]
    stall_warning_secs: u64,
    /// Remove split, shuffle and reduce-output files after each successful merge
    #[arg(long)]
    cleanup: bool,
    /// Run this input as a single job, then exit
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    n_map: usize,
    #[arg(long, default_value_t = 3)]
    n_reduce: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let config = SchedulerConfig {
        rpc_timeout: Duration::from_millis(args.rpc_timeout_ms),
        stall_warning: Duration::from_secs(args.stall_warning_secs),
        cleanup_intermediates: args.cleanup,
    };
    info!(?config, "coordinator configuration");

    let coordinator = Coordinator::new(config);
    let address = coordinator
        .listen(&args.listen)
        .await
        .with_context(|| format!("cannot serve on {}", args.listen))?;
    info!(%address, "waiting for executors to register");

    let Some(input) = args.input else {
        coordinator.closed().await;
        info!("coordinator shut down");
        return Ok(());
    };

    let run = coordinator
        .submit(Job::new(args.n_map, args.n_reduce, input))
        .await?;
    let outcome = coordinator.wait_for_run(run).await;
    let reports = coordinator.terminate().await;
    for report in &reports {
        match report.jobs_completed {
            Some(jobs) => info!(address = %report.address, jobs, "executor statistics"),
            None => warn!(address = %report.address, "executor did not answer shutdown"),
        }
    }

    match outcome.map(|outcome| outcome.result) {
        Some(Ok(output)) => {
            println!("{}", output.display());
            Ok(())
        }
        Some(Err(reason)) => bail!("run failed: {}", reason),
        None => bail!("coordinator closed before the run finished"),
    }
}
