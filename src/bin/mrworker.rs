use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use map_reduce_rs::mr::{
    config::{ExecutorConfig, ExecutorMode, DEFAULT_COORDINATOR_ADDRESS},
    executor::Executor,
    function,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Register with the coordinator, then run whatever map and reduce tasks it
/// hands out until told to shut down.
#[derive(Parser)]
#[command(name = "mrworker")]
struct Args {
    /// The coordinator RPC server
    #[arg(long, default_value = DEFAULT_COORDINATOR_ADDRESS)]
    coordinator: String,
    /// Address this executor serves on; port 0 picks a free one
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,
    /// Map/Reduce application to run
    #[arg(long, default_value = "wc")]
    app: String,
    /// Stop responding after this many completed jobs, to exercise fault tolerance
    #[arg(long)]
    crash_after: Option<usize>,
    /// Timeout for the registration call, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    rpc_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let app = function::lookup(&args.app).ok_or_else(|| {
        anyhow!(
            "unknown application {:?}, expected one of {:?}",
            args.app,
            function::APPLICATIONS
        )
    })?;
    let mut config = ExecutorConfig::new(args.coordinator, args.listen)
        .with_mode(ExecutorMode::from_crash_after(args.crash_after));
    config.rpc_timeout = Duration::from_millis(args.rpc_timeout_ms);

    let running = Executor::new(config, app)
        .start()
        .await
        .context("executor failed to start")?;
    info!(address = running.address(), "serving jobs");

    let (reason, jobs) = running.wait().await;
    info!(?reason, jobs, "executor stopped");
    Ok(())
}
