//! A small MapReduce framework: a coordinator splits one input, hands map and
//! reduce tasks to remote executors over tarpc, and merges the results.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod function;
pub mod pipeline;
pub mod rpc;
pub mod sequential;

use error::{Error, Result};

/// Run file-heavy pipeline work off the async executor threads
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Aborted(e.to_string()))?
}
