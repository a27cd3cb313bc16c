use std::time::Duration;

/// The address the coordinator listens on unless told otherwise
pub const DEFAULT_COORDINATOR_ADDRESS: &str = "127.0.0.1:1030";

/// How long a single coordinator -> executor call may take before the executor is presumed dead
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a phase may go without progress before the scheduler starts complaining
pub const DEFAULT_STALL_WARNING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub rpc_timeout: Duration,
    pub stall_warning: Duration,
    /// Delete split, shuffle and reduce-output files once the merged output exists
    pub cleanup_intermediates: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            stall_warning: DEFAULT_STALL_WARNING,
            cleanup_intermediates: false,
        }
    }
}

/// Failure injection for executors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Reliable,
    /// Serve this many jobs, then stop answering anything, as if the process had died
    CrashAfter(usize),
}

impl ExecutorMode {
    pub fn from_crash_after(jobs: Option<usize>) -> Self {
        match jobs {
            Some(n) => ExecutorMode::CrashAfter(n),
            None => ExecutorMode::Reliable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Where the coordinator's RPC server lives
    pub coordinator: String,
    /// Where this executor serves `DoJob`; port 0 picks a free one
    pub listen: String,
    pub mode: ExecutorMode,
    pub rpc_timeout: Duration,
}

impl ExecutorConfig {
    pub fn new(coordinator: impl Into<String>, listen: impl Into<String>) -> Self {
        Self {
            coordinator: coordinator.into(),
            listen: listen.into(),
            mode: ExecutorMode::Reliable,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, mode: ExecutorMode) -> Self {
        self.mode = mode;
        self
    }
}
