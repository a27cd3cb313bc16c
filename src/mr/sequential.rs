use std::path::PathBuf;

use tracing::info;

use crate::mr::{
    error::Result,
    pipeline::{self, Job, MapFn, ReduceFn},
};

/// Run a whole job in this process, one task after another. The distributed
/// runs are checked against this.
pub fn run(job: &Job, map_fn: &MapFn, reduce_fn: &ReduceFn) -> Result<PathBuf> {
    job.validate()?;
    let input = job.input_path.as_path();
    info!(input = %input.display(), n_map = job.n_map, n_reduce = job.n_reduce, "sequential run");

    pipeline::split(input, job.n_map)?;
    for map_index in 0..job.n_map {
        pipeline::run_map(input, map_index, job.n_reduce, map_fn)?;
    }
    for reduce_index in 0..job.n_reduce {
        pipeline::run_reduce(input, reduce_index, job.n_map, reduce_fn)?;
    }
    pipeline::merge(input, job.n_reduce)
}
