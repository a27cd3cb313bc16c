use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use map_reduce_rs::mr::{function, pipeline, pipeline::Job, sequential};
use tracing_subscriber::EnvFilter;

/// Run a MapReduce job in this process, without any RPC
#[derive(Parser)]
#[command(name = "mrsequential")]
struct Args {
    /// Input file; results land next to it as mrtmp.<name>
    input: PathBuf,
    #[arg(long, default_value_t = 5)]
    n_map: usize,
    #[arg(long, default_value_t = 3)]
    n_reduce: usize,
    /// Map/Reduce application to run
    #[arg(long, default_value = "wc")]
    app: String,
    /// Remove split, shuffle and reduce-output files afterwards
    #[arg(long)]
    cleanup: bool,
}

fn main() -> anyhow::Result<()> {
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
    let job = Job::new(args.n_map, args.n_reduce, args.input);
    let output = sequential::run(&job, app.map_fn(), app.reduce_fn())?;
    if args.cleanup {
        pipeline::cleanup(&job)?;
    }
    println!("{}", output.display());
    Ok(())
}
