use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path} at line {line}: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Partitioning guarantees a key lands in exactly one reduce output,
    /// so seeing it twice at merge time means the shuffle is broken
    #[error("key {key:?} appears in more than one reduce output (again in {path})")]
    DuplicateKey { key: String, path: PathBuf },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("RPC to {address} failed: {reason}")]
    Rpc { address: String, reason: String },

    /// A blocking task panicked or was cancelled before it finished
    #[error("task aborted: {0}")]
    Aborted(String),

    #[error("the coordinator has shut down")]
    Closed,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn rpc(address: &str, reason: impl ToString) -> Self {
        Error::Rpc {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
