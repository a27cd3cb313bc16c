use std::{
    collections::{BTreeSet, HashMap},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{
    future::{self, ready, BoxFuture, Ready},
    FutureExt, StreamExt,
};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::{
    sync::{mpsc, watch, Mutex as AsyncMutex},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::mr::{
    config::SchedulerConfig,
    error::{Error, Result},
    pipeline::{self, Job},
    rpc::{
        self, CoordinatorService, CoordinatorStatus, DoJobArgs, ExecutorReport, ExecutorStatus,
        Phase, RunOutcome, Stage,
    },
    run_blocking,
};

/// Connections served at the same time
const MAX_CONNECTIONS: usize = 64;

/// Lets the shutdown reply leave before the RPC server goes away
const REPLY_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct ExecutorRecord {
    /// `false` once a call to it failed; it gets no more work unless it registers again
    alive: bool,
    /// Bumped on every registration that brings the executor back
    generation: u64,
    /// Tasks finished under every registration of this address
    jobs_completed: usize,
}

/// An idle executor, good for exactly one task
#[derive(Debug, Clone)]
struct Slot {
    address: String,
    generation: u64,
}

/// Result of one dispatched task, sent back to the phase loop
#[derive(Debug)]
struct Dispatched {
    index: usize,
    slot: Slot,
    result: Result<()>,
}

#[derive(Debug)]
struct Progress {
    stage: Stage,
    job: Option<Job>,
    pending: usize,
    in_flight: usize,
    completed: usize,
    since: Instant,
    last_error: Option<String>,
}

/// The master: owns the executor registry, the idle pool and the job queue,
/// and runs one job at a time through split, map, reduce and merge.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<SchedulerConfig>,
    /// Every executor that ever registered, keyed by address. Dead ones stay for shutdown accounting.
    executors: Arc<Mutex<HashMap<String, ExecutorRecord>>>,
    /// Idle executors, fed by registration and by executors finishing a task
    idle_tx: mpsc::UnboundedSender<Slot>,
    idle_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Slot>>>,
    /// Capacity one: a submission made while another waits here blocks the submitter
    jobs_tx: mpsc::Sender<Job>,
    jobs_rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    /// Jobs accepted so far; held across the queue send so numbers follow queue order
    submitted: Arc<AsyncMutex<usize>>,
    progress: Arc<Mutex<Progress>>,
    /// Outcome of every finished run, in submission order
    runs: Arc<watch::Sender<Vec<RunOutcome>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(config: SchedulerConfig) -> Self {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (runs, _) = watch::channel(Vec::new());
        let (closed, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            executors: Arc::new(Mutex::new(HashMap::new())),
            idle_tx,
            idle_rx: Arc::new(AsyncMutex::new(idle_rx)),
            jobs_tx,
            jobs_rx: Arc::new(AsyncMutex::new(jobs_rx)),
            submitted: Arc::new(AsyncMutex::new(0)),
            progress: Arc::new(Mutex::new(Progress {
                stage: Stage::WaitingForJob,
                job: None,
                pending: 0,
                in_flight: 0,
                completed: 0,
                since: Instant::now(),
                last_error: None,
            })),
            runs: Arc::new(runs),
            closed: Arc::new(closed),
        }
    }

    /// Start the RPC server on `address` and the scheduler behind it. Returns the bound address.
    pub async fn listen(&self, address: &str) -> Result<SocketAddr> {
        let mut listener = tarpc::serde_transport::tcp::listen(address, Json::default)
            .await
            .map_err(|e| Error::rpc(address, e))?;
        listener.config_mut().max_frame_length(usize::MAX);
        let local = listener.local_addr();

        let handler = self.clone();
        let mut closed = self.closed.subscribe();
        tokio::spawn(async move {
            let serving = listener
                // Accepts if this is a valid connection, otherwise ignores this connection
                .filter_map(|r| future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .map(move |channel| channel.execute(handler.clone().serve()))
                .buffer_unordered(MAX_CONNECTIONS)
                .for_each(|_| async {});
            tokio::select! {
                _ = serving => {}
                _ = closed.wait_for(|c| *c) => {}
            }
            info!("coordinator RPC server stopped");
        });
        tokio::spawn(self.clone().schedule());

        info!(address = %local, "coordinator is serving");
        Ok(local)
    }

    /// Add an executor to the idle pool. A repeated registration of a live
    /// executor changes nothing; a dead or new one comes back with a fresh slot.
    pub fn register_executor(&self, address: String) -> bool {
        if *self.closed.borrow() {
            return false;
        }
        let mut executors = self.executors.lock().unwrap();
        let record = executors.entry(address.clone()).or_insert(ExecutorRecord {
            alive: false,
            generation: 0,
            jobs_completed: 0,
        });
        if record.alive {
            debug!(%address, "executor registered again, already known");
            return true;
        }
        record.alive = true;
        record.generation += 1;
        info!(%address, generation = record.generation, "executor registered");
        self.idle_tx
            .send(Slot {
                address,
                generation: record.generation,
            })
            .is_ok()
    }

    /// Queue a job and return its run number, the `n` to pass to
    /// [`Coordinator::wait_for_run`]. Returns once the job is queued, not when
    /// it is done; waits while another submission already occupies the queue.
    pub async fn submit(&self, job: Job) -> Result<usize> {
        job.validate()?;
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(Error::Closed);
        }
        let mut submitted = self.submitted.lock().await;
        info!(?job, run = *submitted + 1, "job submitted");
        tokio::select! {
            sent = self.jobs_tx.send(job) => sent.map_err(|_| Error::Closed)?,
            _ = closed.wait_for(|c| *c) => return Err(Error::Closed),
        }
        *submitted += 1;
        Ok(*submitted)
    }

    /// How run `n` (counting from 1) ended, if it has
    pub fn outcome(&self, n: usize) -> Option<RunOutcome> {
        n.checked_sub(1)
            .and_then(|index| self.runs.borrow().get(index).cloned())
    }

    /// Wait for the `n`-th run (counting from 1) to finish. `None` if the
    /// coordinator shuts down first.
    pub async fn wait_for_run(&self, n: usize) -> Option<RunOutcome> {
        if n == 0 {
            return None;
        }
        let mut runs = self.runs.subscribe();
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            finished = runs.wait_for(|runs| runs.len() >= n) => {
                finished.ok().and_then(|runs| runs.get(n - 1).cloned())
            }
            _ = closed.wait_for(|c| *c) => None,
        }
    }

    /// Current stage, task counts and executor liveness
    pub fn snapshot(&self) -> CoordinatorStatus {
        let completed_runs = self.runs.borrow().len() as u64;
        let mut executors: Vec<ExecutorStatus> = self
            .executors
            .lock()
            .unwrap()
            .iter()
            .map(|(address, record)| ExecutorStatus {
                address: address.clone(),
                alive: record.alive,
                jobs_completed: record.jobs_completed,
            })
            .collect();
        executors.sort_by(|a, b| a.address.cmp(&b.address));

        let progress = self.progress.lock().unwrap();
        CoordinatorStatus {
            stage: progress.stage,
            job: progress.job.clone(),
            pending_tasks: progress.pending,
            in_flight_tasks: progress.in_flight,
            completed_tasks: progress.completed,
            stage_elapsed_ms: progress.since.elapsed().as_millis() as u64,
            completed_runs,
            last_error: progress.last_error.clone(),
            executors,
        }
    }

    /// Send `Shutdown` to every executor ever registered, all at once. An
    /// executor that does not answer is reported without a count and does
    /// not hold up the others.
    pub async fn stop_executors(&self) -> Vec<ExecutorReport> {
        let mut addresses: Vec<String> = self.executors.lock().unwrap().keys().cloned().collect();
        addresses.sort();
        let timeout = self.config.rpc_timeout;

        let reports = future::join_all(addresses.into_iter().map(|address| async move {
            match rpc::call_shutdown(&address, timeout).await {
                Ok(jobs) => {
                    info!(%address, jobs, "executor shut down");
                    ExecutorReport {
                        address,
                        jobs_completed: Some(jobs),
                    }
                }
                Err(e) => {
                    warn!(%address, error = %e, "executor shutdown failed");
                    ExecutorReport {
                        address,
                        jobs_completed: None,
                    }
                }
            }
        }))
        .await;

        for record in self.executors.lock().unwrap().values_mut() {
            record.alive = false;
        }
        reports
    }

    /// Stop the RPC server and the scheduler. A run in progress is abandoned.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Stop every executor, then the coordinator itself
    pub async fn terminate(&self) -> Vec<ExecutorReport> {
        let reports = self.stop_executors().await;
        self.close();
        reports
    }

    /// Resolves once the coordinator has been closed
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }

    fn enter(&self, stage: Stage, job: Option<&Job>) {
        let mut progress = self.progress.lock().unwrap();
        progress.stage = stage;
        progress.job = job.cloned();
        progress.pending = 0;
        progress.in_flight = 0;
        progress.completed = 0;
        progress.since = Instant::now();
    }

    fn report_counts(&self, pending: usize, in_flight: usize, completed: usize) {
        let mut progress = self.progress.lock().unwrap();
        progress.pending = pending;
        progress.in_flight = in_flight;
        progress.completed = completed;
    }

    fn is_current(&self, slot: &Slot) -> bool {
        self.executors
            .lock()
            .unwrap()
            .get(&slot.address)
            .map_or(false, |record| record.alive && record.generation == slot.generation)
    }

    fn credit(&self, slot: &Slot) {
        if let Some(record) = self.executors.lock().unwrap().get_mut(&slot.address) {
            if record.generation == slot.generation {
                record.jobs_completed += 1;
            }
        }
    }

    /// Mark the executor behind `slot` dead, unless it has registered again since
    fn bury(&self, slot: &Slot) {
        if let Some(record) = self.executors.lock().unwrap().get_mut(&slot.address) {
            if record.generation == slot.generation {
                record.alive = false;
            }
        }
    }

    fn live_executors(&self) -> usize {
        self.executors
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.alive)
            .count()
    }

    /// The scheduler: take one job at a time off the queue and see it through
    async fn schedule(self) {
        let mut jobs = self.jobs_rx.lock().await;
        let mut idle = self.idle_rx.lock().await;
        let mut closed = self.closed.subscribe();
        loop {
            self.enter(Stage::WaitingForJob, None);
            let job = tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = closed.wait_for(|c| *c) => break,
            };

            let result = tokio::select! {
                result = self.run_job(&job, &mut idle) => result,
                _ = closed.wait_for(|c| *c) => break,
            };
            let result = match result {
                Ok(output) => {
                    info!(output = %output.display(), "run finished");
                    self.enter(Stage::Done, Some(&job));
                    self.progress.lock().unwrap().last_error = None;
                    Ok(output)
                }
                Err(e) => {
                    error!(error = %e, ?job, "run failed");
                    self.progress.lock().unwrap().last_error = Some(e.to_string());
                    Err(e.to_string())
                }
            };
            self.runs.send_modify(|runs| runs.push(RunOutcome { job, result }));
        }
        debug!("scheduler stopped");
    }

    async fn run_job(
        &self,
        job: &Job,
        idle: &mut mpsc::UnboundedReceiver<Slot>,
    ) -> Result<PathBuf> {
        self.enter(Stage::Splitting, Some(job));
        let (input, n_map) = (job.input_path.clone(), job.n_map);
        run_blocking(move || pipeline::split(&input, n_map)).await?;

        self.run_phase(job, Phase::Map, idle).await;
        // Every map task has been retired, so every shuffle file exists
        self.run_phase(job, Phase::Reduce, idle).await;

        self.enter(Stage::Merging, Some(job));
        let (input, n_reduce) = (job.input_path.clone(), job.n_reduce);
        let output = run_blocking(move || pipeline::merge(&input, n_reduce)).await?;

        if self.config.cleanup_intermediates {
            let finished = job.clone();
            if let Err(e) = run_blocking(move || pipeline::cleanup(&finished)).await {
                warn!(error = %e, "could not remove intermediate files");
            }
        }
        Ok(output)
    }

    /// Hand out every task of one phase and return once each has succeeded.
    ///
    /// Only this loop touches the unassigned set; dispatches report back over
    /// a channel, so an index is held by at most one dispatch at a time and
    /// is retired at most once. A failed dispatch puts its index back and
    /// keeps the executor out of the idle pool.
    async fn run_phase(
        &self,
        job: &Job,
        phase: Phase,
        idle: &mut mpsc::UnboundedReceiver<Slot>,
    ) {
        let (count, other, stage) = match phase {
            Phase::Map => (job.n_map, job.n_reduce, Stage::MapPhase),
            Phase::Reduce => (job.n_reduce, job.n_map, Stage::ReducePhase),
        };
        self.enter(stage, Some(job));
        info!(%phase, tasks = count, "phase started");

        let mut unassigned: BTreeSet<usize> = (0..count).collect();
        let mut retired = vec![false; count];
        let mut completed = 0;
        let mut in_flight = 0;
        self.report_counts(unassigned.len(), in_flight, completed);

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Dispatched>();
        let mut watchdog = tokio::time::interval(self.config.stall_warning);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately
        watchdog.tick().await;
        let mut last_progress = Instant::now();

        while completed < count {
            tokio::select! {
                Some(slot) = idle.recv(), if !unassigned.is_empty() => {
                    if !self.is_current(&slot) {
                        debug!(address = %slot.address, "skipping stale idle executor");
                    } else if let Some(index) = unassigned.pop_first() {
                        in_flight += 1;
                        debug!(%phase, task = index, executor = %slot.address, "dispatching task");
                        let args = DoJobArgs {
                            file: job.input_path.clone(),
                            operation: phase,
                            job_number: index,
                            num_other_phase: other,
                        };
                        let timeout = self.config.rpc_timeout;
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            let result = rpc::call_do_job(&slot.address, args, timeout).await;
                            let _ = done_tx.send(Dispatched { index, slot, result });
                        });
                    }
                }
                Some(done) = done_rx.recv() => {
                    in_flight -= 1;
                    last_progress = Instant::now();
                    match done.result {
                        Ok(()) => {
                            if retired[done.index] {
                                warn!(%phase, task = done.index, "task reported done twice");
                            } else {
                                retired[done.index] = true;
                                completed += 1;
                            }
                            debug!(%phase, task = done.index, executor = %done.slot.address, "task done");
                            self.credit(&done.slot);
                            let _ = self.idle_tx.send(done.slot);
                        }
                        Err(e) => {
                            warn!(
                                %phase,
                                task = done.index,
                                executor = %done.slot.address,
                                error = %e,
                                "executor presumed dead, task requeued"
                            );
                            self.bury(&done.slot);
                            unassigned.insert(done.index);
                        }
                    }
                }
                _ = watchdog.tick() => {
                    let stalled = last_progress.elapsed();
                    if stalled >= self.config.stall_warning {
                        warn!(
                            %phase,
                            pending = unassigned.len(),
                            in_flight,
                            live_executors = self.live_executors(),
                            stalled_for = ?stalled,
                            "phase is not making progress"
                        );
                    }
                }
            }
            self.report_counts(unassigned.len(), in_flight, completed);
        }
        info!(%phase, "phase finished");
    }
}

/// RPC related for Coordinator
#[tarpc::server]
impl CoordinatorService for Coordinator {
    type RegisterFut = Ready<bool>;
    type SubmitJobFut = BoxFuture<'static, Option<usize>>;
    type StatusFut = Ready<CoordinatorStatus>;
    type RunOutcomeFut = Ready<Option<RunOutcome>>;
    type ShutdownFut = BoxFuture<'static, Vec<ExecutorReport>>;

    fn register(self, _: context::Context, address: String) -> Self::RegisterFut {
        ready(self.register_executor(address))
    }

    fn submit_job(self, _: context::Context, job: Job) -> Self::SubmitJobFut {
        async move {
            match self.submit(job).await {
                Ok(run) => Some(run),
                Err(e) => {
                    warn!(error = %e, "job rejected");
                    None
                }
            }
        }
        .boxed()
    }

    fn status(self, _: context::Context) -> Self::StatusFut {
        ready(self.snapshot())
    }

    fn run_outcome(self, _: context::Context, run: usize) -> Self::RunOutcomeFut {
        ready(self.outcome(run))
    }

    fn shutdown(self, _: context::Context) -> Self::ShutdownFut {
        async move {
            let reports = self.stop_executors().await;
            let coordinator = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(REPLY_GRACE).await;
                coordinator.close();
            });
            reports
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            rpc_timeout: Duration::from_secs(1),
            stall_warning: Duration::from_millis(200),
            cleanup_intermediates: false,
        }
    }

    async fn wait_until<F: Fn(&CoordinatorStatus) -> bool>(coordinator: &Coordinator, check: F) {
        for _ in 0..200 {
            if check(&coordinator.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached, status: {:?}", coordinator.snapshot());
    }

    #[tokio::test]
    async fn repeated_registration_adds_one_slot() {
        let coordinator = Coordinator::new(quick_config());
        assert!(coordinator.register_executor("10.0.0.1:7000".into()));
        assert!(coordinator.register_executor("10.0.0.1:7000".into()));

        let mut idle = coordinator.idle_rx.lock().await;
        assert_eq!(idle.try_recv().unwrap().generation, 1);
        assert!(idle.try_recv().is_err());
        assert_eq!(coordinator.snapshot().executors.len(), 1);
    }

    #[tokio::test]
    async fn dead_executor_comes_back_with_a_new_generation() {
        let coordinator = Coordinator::new(quick_config());
        coordinator.register_executor("10.0.0.1:7000".into());
        let first = coordinator.idle_rx.lock().await.try_recv().unwrap();

        coordinator.bury(&first);
        assert!(!coordinator.is_current(&first));
        assert!(coordinator.register_executor("10.0.0.1:7000".into()));

        let second = coordinator.idle_rx.lock().await.try_recv().unwrap();
        assert_eq!(second.generation, 2);
        assert!(coordinator.is_current(&second));
        // a late failure report from the old incarnation must not kill the new one
        coordinator.bury(&first);
        assert!(coordinator.is_current(&second));
    }

    #[tokio::test]
    async fn job_counts_survive_re_registration() {
        let coordinator = Coordinator::new(quick_config());
        coordinator.register_executor("10.0.0.1:7000".into());
        let first = coordinator.idle_rx.lock().await.try_recv().unwrap();
        coordinator.credit(&first);
        coordinator.credit(&first);
        coordinator.bury(&first);

        coordinator.register_executor("10.0.0.1:7000".into());
        let second = coordinator.idle_rx.lock().await.try_recv().unwrap();
        coordinator.credit(&second);

        let status = coordinator.snapshot();
        assert_eq!(status.executors[0].jobs_completed, 3);
        assert!(status.executors[0].alive);
    }

    #[tokio::test]
    async fn submissions_are_numbered_in_queue_order() {
        let coordinator = Coordinator::new(quick_config());
        assert_eq!(coordinator.submit(Job::new(1, 1, "a.txt")).await.unwrap(), 1);
        // drain the queue by hand, as the scheduler would
        let job = coordinator.jobs_rx.lock().await.try_recv().unwrap();
        assert_eq!(job.input_path, PathBuf::from("a.txt"));
        assert_eq!(coordinator.submit(Job::new(1, 1, "b.txt")).await.unwrap(), 2);
        assert_eq!(coordinator.outcome(0), None);
        assert_eq!(coordinator.outcome(1), None);
    }

    #[tokio::test]
    async fn invalid_jobs_are_rejected() {
        let coordinator = Coordinator::new(quick_config());
        let err = coordinator.submit(Job::new(0, 2, "in.txt")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidJob(_)));
    }

    #[tokio::test]
    async fn second_queued_submission_blocks_the_submitter() {
        // no scheduler is running, so nothing drains the queue
        let coordinator = Coordinator::new(quick_config());
        coordinator.submit(Job::new(1, 1, "a.txt")).await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            coordinator.submit(Job::new(1, 1, "b.txt")),
        )
        .await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn closed_coordinator_refuses_work() {
        let coordinator = Coordinator::new(quick_config());
        coordinator.close();
        assert!(!coordinator.register_executor("10.0.0.1:7000".into()));
        assert!(matches!(
            coordinator.submit(Job::new(1, 1, "a.txt")).await,
            Err(Error::Closed)
        ));
        assert_eq!(coordinator.wait_for_run(1).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn phase_waits_without_executors_and_exposes_pending_work() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "a\nb\nc\n").unwrap();
        let coordinator = Coordinator::new(quick_config());
        coordinator.listen("127.0.0.1:0").await.unwrap();

        coordinator.submit(Job::new(3, 2, &input)).await.unwrap();

        wait_until(&coordinator, |s| s.stage == Stage::MapPhase).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = coordinator.snapshot();
        assert_eq!(status.stage, Stage::MapPhase);
        assert_eq!(status.pending_tasks, 3);
        assert_eq!(status.in_flight_tasks, 0);
        assert_eq!(status.completed_runs, 0);
        coordinator.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_executor_is_buried_and_its_task_requeued() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "a\n").unwrap();
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let coordinator = Coordinator::new(quick_config());
        coordinator.listen("127.0.0.1:0").await.unwrap();
        coordinator.register_executor(format!("127.0.0.1:{}", port));

        coordinator.submit(Job::new(1, 1, &input)).await.unwrap();

        wait_until(&coordinator, |s| {
            s.stage == Stage::MapPhase
                && s.in_flight_tasks == 0
                && s.executors.iter().all(|e| !e.alive)
        })
        .await;
        assert_eq!(coordinator.snapshot().pending_tasks, 1);
        coordinator.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_input_fails_the_run_but_not_the_coordinator() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(quick_config());
        coordinator.listen("127.0.0.1:0").await.unwrap();

        let job = Job::new(2, 2, dir.path().join("absent.txt"));
        coordinator.submit(job.clone()).await.unwrap();

        let outcome = coordinator.wait_for_run(1).await.unwrap();
        assert_eq!(outcome.job, job);
        assert!(outcome.result.is_err());
        let status = coordinator.snapshot();
        assert_eq!(status.completed_runs, 1);
        assert!(status.last_error.is_some());
        // still accepting work
        assert!(coordinator.register_executor("10.0.0.1:7000".into()));
        coordinator.close();
    }
}
