use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use map_reduce_rs::mr::{config::DEFAULT_COORDINATOR_ADDRESS, pipeline::Job, rpc};
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Talk to a running coordinator
#[derive(Parser)]
#[command(name = "mrsubmit")]
struct Cli {
    #[arg(long, default_value = DEFAULT_COORDINATOR_ADDRESS)]
    coordinator: String,
    /// Deadline for each call, in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job
    Job {
        input: PathBuf,
        #[arg(long, default_value_t = 5)]
        n_map: usize,
        #[arg(long, default_value_t = 3)]
        n_reduce: usize,
        /// Poll until the job has finished
        #[arg(long)]
        wait: bool,
    },
    /// Print the scheduler's current state
    Status,
    /// Shut down every executor and then the coordinator
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout_secs);
    let client = rpc::connect_coordinator(&cli.coordinator, timeout)
        .await
        .with_context(|| format!("cannot reach coordinator at {}", cli.coordinator))?;

    match cli.command {
        Commands::Job {
            input,
            n_map,
            n_reduce,
            wait,
        } => {
            let job = Job::new(n_map, n_reduce, input);
            let Some(run) = client.submit_job(rpc::deadline(timeout), job.clone()).await? else {
                bail!("coordinator rejected {:?}", job);
            };
            info!(?job, run, "job submitted");
            if wait {
                let outcome = loop {
                    if let Some(outcome) = client.run_outcome(rpc::deadline(timeout), run).await? {
                        break outcome;
                    }
                    sleep(Duration::from_millis(500)).await;
                };
                match outcome.result {
                    Ok(output) => {
                        info!(run, "job finished");
                        println!("{}", output.display());
                    }
                    Err(reason) => bail!("run {} failed: {}", run, reason),
                }
            }
        }
        Commands::Status => {
            let status = client.status(rpc::deadline(timeout)).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Shutdown => {
            let reports = client.shutdown(rpc::deadline(timeout)).await?;
            for report in reports {
                match report.jobs_completed {
                    Some(jobs) => println!("{}\t{}", report.address, jobs),
                    None => println!("{}\tno answer", report.address),
                }
            }
        }
    }
    Ok(())
}
