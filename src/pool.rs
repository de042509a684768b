//! The public `ThreadPool` type: wires the counter pair, queue, shrink
//! strategy, reservation facility, and worker set together (spec §2 data
//! flow), and implements submission (§4.2) and two-phase lifecycle (§4.6,
//! §4.7).

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::PoolConfig;
use crate::counters::STOPPED;
use crate::diagnostics::{PoolDump, StackTag, WorkerDump};
use crate::error::PoolError;
use crate::queue::{BlockingQueue, ChannelQueue, Closeable, FnJob, Job, JobBox, NoopJob};
use crate::reservation::{AlwaysFalse, FixedReservation, ReservationFacility};
use crate::shrink::ShrinkStrategy;
use crate::state::PoolState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

pub(crate) struct WorkerEntry {
    pub(crate) handle: Option<JoinHandle<()>>,
    pub(crate) thread: Option<Thread>,
    pub(crate) tag: Mutex<StackTag>,
    /// Self-captured at the worker's own state-transition checkpoints, never
    /// by another thread reaching in — capturing a *remote* thread's stack
    /// isn't something Rust can do safely, so a dumper only ever reads what
    /// the worker already captured about itself.
    pub(crate) backtrace: Mutex<Option<String>>,
    pub(crate) interrupted: AtomicBool,
}

impl WorkerEntry {
    fn new() -> Self {
        Self {
            handle: None,
            thread: None,
            tag: Mutex::new(StackTag::Idle),
            backtrace: Mutex::new(None),
            interrupted: AtomicBool::new(false),
        }
    }
}

/// Everything a worker thread needs a handle to. Shared via `Arc` with every
/// spawned worker; the `ThreadPool` handle just wraps one of these.
pub(crate) struct Inner {
    pub(crate) config: RwLock<PoolConfig>,
    pub(crate) state: PoolState,
    pub(crate) queue: Arc<dyn BlockingQueue>,
    pub(crate) shrink: RwLock<Arc<ShrinkStrategy>>,
    pub(crate) reservation: RwLock<Arc<dyn ReservationFacility>>,
    pub(crate) workers: Mutex<HashMap<usize, WorkerEntry>>,
    pub(crate) next_worker_id: AtomicUsize,
    pub(crate) lifecycle: (Mutex<LifecycleState>, Condvar),
    pub(crate) run_job_hook: Arc<dyn Fn(JobBox) + Send + Sync>,
}

impl Inner {
    pub(crate) fn current_shrink(&self) -> Arc<ShrinkStrategy> {
        self.shrink.read().clone()
    }
}

/// A bounded, elastic worker thread pool.
///
/// Cheap to clone: internally an `Arc` over shared state, so a `ThreadPool`
/// handle can be shared across producers the same way a channel sender is.
#[derive(Clone)]
pub struct ThreadPool {
    pub(crate) inner: Arc<Inner>,
}

impl ThreadPool {
    /// Builds a pool with an unbounded default queue.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_queue(config, Arc::new(ChannelQueue::new(None)))
    }

    /// Builds a pool backed by a caller-supplied queue (e.g. bounded, to get
    /// back-pressure via `Rejected`).
    pub fn with_queue(config: PoolConfig, queue: Arc<dyn BlockingQueue>) -> Result<Self, PoolError> {
        config.validate()?;
        let shrink = ShrinkStrategy::select(
            config.idle_timeout_millis(),
            config.max_shrink_count(),
            config.max_threads() as usize,
        );
        let inner = Arc::new(Inner {
            config: RwLock::new(config),
            state: PoolState::new(0, 0),
            queue,
            shrink: RwLock::new(Arc::new(shrink)),
            reservation: RwLock::new(Arc::new(AlwaysFalse) as Arc<dyn ReservationFacility>),
            workers: Mutex::new(HashMap::new()),
            next_worker_id: AtomicUsize::new(0),
            lifecycle: (Mutex::new(LifecycleState::NotStarted), Condvar::new()),
            run_job_hook: Arc::new(|job: JobBox| job.run()),
        });
        Ok(Self { inner })
    }

    /// Overrides the job-execution hook (spec §4.5.1), e.g. to add
    /// pre/post-run instrumentation. Only effective if called before any
    /// clone of this handle has been made.
    pub fn with_run_job_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(JobBox) + Send + Sync + 'static,
    {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.run_job_hook = Arc::new(hook);
        }
        self
    }

    // ---- lifecycle (C7) ----------------------------------------------

    pub fn start(&self) -> Result<(), PoolError> {
        {
            let mut lifecycle = self.inner.lifecycle.0.lock();
            if *lifecycle != LifecycleState::NotStarted {
                return Err(PoolError::InvalidConfig(
                    "pool already started".to_string(),
                ));
            }
            *lifecycle = LifecycleState::Running;
        }

        self.inner.current_shrink().init(0);

        let reserved = self.inner.config.read().resolved_reserved_threads();
        if self.inner.config.read().reserved_threads() != 0 {
            *self.inner.reservation.write() = Arc::new(FixedReservation::new(reserved));
        }

        let (min, max) = {
            let cfg = self.inner.config.read();
            (cfg.min_threads() as i32, cfg.max_threads() as i32)
        };
        for _ in 0..min.min(max) {
            if !self.inner.state.add_counts(1, 1) {
                break;
            }
            start_thread(&self.inner, -1, -1);
        }
        Ok(())
    }

    /// Two-phase stop (spec §4.7). Returns once every worker has exited or
    /// the timeout has elapsed, whichever comes first; stuck workers are
    /// logged, never force-killed.
    pub fn stop(&self, timeout: Duration) -> Result<(), PoolError> {
        {
            let mut lifecycle = self.inner.lifecycle.0.lock();
            if matches!(
                *lifecycle,
                LifecycleState::NotStarted | LifecycleState::Stopped
            ) {
                return Ok(());
            }
            *lifecycle = LifecycleState::Stopping;
        }
        self.inner.lifecycle.1.notify_all();

        // 1. detach the reservation facility.
        *self.inner.reservation.write() = Arc::new(AlwaysFalse);

        // 2. swap T := STOPPED, capturing N.
        let n = self.inner.state.counters().get_and_set_hi(STOPPED).max(0) as usize;

        if !timeout.is_zero() {
            let half = timeout / 2;
            for _ in 0..n {
                let _ = self.inner.queue.offer(Box::new(NoopJob));
            }
            wait_for_workers_empty(&self.inner, half);

            let caller = thread::current().id();
            for entry in self.inner.workers.lock().values() {
                if entry.thread.as_ref().map(Thread::id) != Some(caller) {
                    entry.interrupted.store(true, Ordering::SeqCst);
                    if let Some(t) = &entry.thread {
                        t.unpark();
                    }
                }
            }
            wait_for_workers_empty(&self.inner, half);

            for (id, entry) in self.inner.workers.lock().iter() {
                match entry.backtrace.lock().as_deref() {
                    Some(bt) => log::warn!("kind=stuck_worker\tworker_id={id}\tbacktrace={bt}"),
                    None => log::warn!("kind=stuck_worker\tworker_id={id}"),
                }
            }
        }

        // 4. drain remaining jobs; a job is run XOR closed, never both,
        // because this only ever reads what the queue yields after the
        // stop sentinel (step 2) is already live.
        for mut job in self.inner.queue.drain_snapshot() {
            if job.as_any().is::<NoopJob>() {
                continue;
            }
            match job.as_closeable() {
                Some(closeable) => {
                    if let Err(e) = closeable.close() {
                        log::warn!("kind=close_failed\terror={e}");
                    }
                }
                None => log::warn!("kind=job_not_executed\treason=stopped_without_executing"),
            }
        }

        {
            let mut lifecycle = self.inner.lifecycle.0.lock();
            *lifecycle = LifecycleState::Stopped;
        }
        self.inner.lifecycle.1.notify_all();
        Ok(())
    }

    /// Blocks until the pool has fully stopped.
    pub fn join(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.0.lock();
            while matches!(
                *lifecycle,
                LifecycleState::Running | LifecycleState::NotStarted
            ) {
                self.inner.lifecycle.1.wait(&mut lifecycle);
            }
        }
        while *self.inner.lifecycle.0.lock() != LifecycleState::Stopped {
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.lifecycle.0.lock() == LifecycleState::Running
    }

    pub fn is_stopping(&self) -> bool {
        *self.inner.lifecycle.0.lock() == LifecycleState::Stopping
    }

    pub fn is_started(&self) -> bool {
        *self.inner.lifecycle.0.lock() != LifecycleState::NotStarted
    }

    // ---- submission (C6) ----------------------------------------------

    /// Fire-and-forget submission. Fails with `Rejected` if the pool is
    /// stopping or a bounded queue refuses the job.
    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_job(Box::new(FnJob::new(f)))
    }

    /// Submission for a job carrying a [`crate::queue::Closeable`]
    /// capability.
    pub fn execute_job(&self, job: JobBox) -> Result<(), PoolError> {
        let start_worker = loop {
            let (t, i) = self.inner.state.counters().get();
            if t == STOPPED {
                return Err(PoolError::Rejected);
            }
            let max_threads = self.inner.config.read().max_threads() as i32;
            let start_worker = if i <= 0 && t < max_threads { 1 } else { 0 };
            if self
                .inner
                .state
                .counters()
                .compare_exchange((t, i), t + start_worker, i + start_worker - 1)
                .is_ok()
            {
                break start_worker;
            }
        };

        match self.inner.queue.offer(job) {
            Ok(()) => {
                if start_worker == 1 {
                    start_thread(&self.inner, -1, 0);
                }
                Ok(())
            }
            Err(_rejected) => {
                if !self
                    .inner
                    .state
                    .add_counts(-start_worker, 1 - start_worker)
                {
                    log::trace!("counter reversal observed pool already stopping");
                }
                Err(PoolError::Rejected)
            }
        }
    }

    /// Best-effort dispatch via the reservation facility. Never blocks,
    /// never enqueues.
    pub fn try_execute<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .reservation
            .read()
            .clone()
            .try_execute(Box::new(f))
    }

    // ---- tuning ----------------------------------------------------

    pub fn set_min_threads(&self, min: u32) {
        self.inner.config.write().set_min_threads(min);
        ensure_threads(&self.inner);
    }

    pub fn set_max_threads(&self, max: u32) -> Result<(), PoolError> {
        self.inner.config.write().set_max_threads(max)?;
        ensure_threads(&self.inner);
        Ok(())
    }

    pub fn set_idle_timeout_millis(&self, millis: u64) {
        self.inner.config.write().set_idle_timeout_millis(millis);
        self.reselect_shrink();
    }

    pub fn set_max_shrink_count(&self, count: u32) -> Result<(), PoolError> {
        self.inner.config.write().set_max_shrink_count(count)?;
        self.reselect_shrink();
        Ok(())
    }

    /// Only valid while the pool has not been started.
    pub fn set_reserved_threads(&self, reserved: i32) -> Result<(), PoolError> {
        if self.is_started() {
            return Err(PoolError::InvalidConfig(
                "reserved_threads can only change before start".to_string(),
            ));
        }
        self.inner.config.write().set_reserved_threads(reserved)
    }

    pub fn set_stop_timeout_millis(&self, millis: u64) {
        self.inner.config.write().set_stop_timeout_millis(millis);
    }

    pub fn set_low_threads_threshold(&self, threshold: i32) {
        self.inner
            .config
            .write()
            .set_low_threads_threshold(threshold);
    }

    pub fn set_daemon(&self, daemon: bool) {
        self.inner.config.write().set_daemon(daemon);
    }

    /// Only valid while the pool has not been started.
    pub fn set_name(&self, name: impl Into<String>) -> Result<(), PoolError> {
        if self.is_started() {
            return Err(PoolError::InvalidConfig(
                "name can only change before start".to_string(),
            ));
        }
        self.inner.config.write().set_name(name);
        Ok(())
    }

    pub fn set_detailed_dump(&self, detailed: bool) {
        self.inner.config.write().set_detailed_dump(detailed);
    }

    fn reselect_shrink(&self) {
        let (idle_timeout, shrink_count, capacity) = {
            let cfg = self.inner.config.read();
            (
                cfg.idle_timeout_millis(),
                cfg.max_shrink_count(),
                cfg.max_threads() as usize,
            )
        };
        *self.inner.shrink.write() =
            Arc::new(ShrinkStrategy::select(idle_timeout, shrink_count, capacity));
    }

    // ---- observers ---------------------------------------------------

    pub fn threads(&self) -> i32 {
        self.inner.state.threads()
    }

    pub fn idle_threads(&self) -> i32 {
        self.inner.state.idle_threads()
    }

    pub fn queue_size(&self) -> i32 {
        self.inner.state.queue_size()
    }

    fn available_reserved(&self) -> i32 {
        self.inner.reservation.read().available()
    }

    fn leased(&self) -> i32 {
        self.inner.reservation.read().leased()
    }

    pub fn ready_threads(&self) -> i32 {
        self.inner.state.ready_threads(self.available_reserved())
    }

    pub fn busy_threads(&self) -> i32 {
        self.inner
            .state
            .busy_threads(self.available_reserved(), self.leased())
    }

    pub fn utilized_threads(&self) -> i32 {
        self.inner
            .state
            .utilized_threads(self.available_reserved(), self.leased())
    }

    pub fn max_available_threads(&self) -> i32 {
        self.inner.config.read().max_threads() as i32
    }

    pub fn utilization_rate(&self) -> f64 {
        self.inner.state.utilization_rate(
            self.max_available_threads(),
            self.available_reserved(),
            self.leased(),
        )
    }

    pub fn max_reserved_threads(&self) -> u32 {
        self.inner.reservation.read().capacity()
    }

    pub fn available_reserved_threads(&self) -> i32 {
        self.available_reserved()
    }

    pub fn leased_threads(&self) -> i32 {
        self.leased()
    }

    pub fn max_leased_threads(&self) -> u32 {
        self.inner.reservation.read().capacity()
    }

    pub fn is_low_on_threads(&self) -> bool {
        let threshold = self.inner.config.read().low_threads_threshold();
        self.inner.state.is_low_on_threads(
            self.max_available_threads(),
            self.available_reserved(),
            threshold,
        )
    }

    // ---- diagnostics (C11) --------------------------------------------

    /// Best-effort interrupt: sets a flag the worker's hook can check
    /// cooperatively, and unparks the thread. Cannot preempt a job already
    /// running CPU-bound code, matching spec §7/§4.7: stuck workers are
    /// logged, not force-killed.
    pub fn interrupt_thread(&self, worker_id: usize) -> bool {
        let workers = self.inner.workers.lock();
        match workers.get(&worker_id) {
            Some(entry) => {
                entry.interrupted.store(true, Ordering::SeqCst);
                if let Some(t) = &entry.thread {
                    t.unpark();
                }
                true
            }
            None => false,
        }
    }

    pub fn dump_thread(&self, worker_id: usize) -> Option<String> {
        let workers = self.inner.workers.lock();
        let entry = workers.get(&worker_id)?;
        let mut out = format!("worker_id={worker_id}\ttag={}", *entry.tag.lock());
        if let Some(bt) = entry.backtrace.lock().as_deref() {
            out.push_str("\tbacktrace=");
            out.push_str(bt);
        }
        Some(out)
    }

    pub fn dump_pool(&self, include_queue: bool) -> PoolDump {
        let workers = self
            .inner
            .workers
            .lock()
            .iter()
            .map(|(id, entry)| WorkerDump {
                worker_id: *id,
                tag: *entry.tag.lock(),
                backtrace: entry.backtrace.lock().clone(),
            })
            .collect();
        PoolDump {
            threads: self.threads(),
            idle_threads: self.idle_threads(),
            queue_size: self.queue_size(),
            workers,
            queued_jobs: if include_queue {
                Some(self.inner.queue.len())
            } else {
                None
            },
        }
    }
}

fn wait_for_workers_empty(inner: &Arc<Inner>, budget: Duration) {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if inner.workers.lock().is_empty() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Creates a new worker: registers it in the live-worker set before
/// spawning the OS thread, resets the shrink baseline, then starts it. Any
/// failure rolls back the `(rollback_hi, rollback_lo)` pre-registration
/// delta the caller applied (spec §4.6) — passed in explicitly, rather than
/// spec's uniform `(-1, -1)`, so the reversal exactly matches whichever of
/// the two callers (demand growth vs. min-threads priming) triggered it.
pub(crate) fn start_thread(inner: &Arc<Inner>, rollback_hi: i32, rollback_lo: i32) {
    let worker_id = inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
    inner.workers.lock().insert(worker_id, WorkerEntry::new());
    inner.current_shrink().init(worker_id);

    let name = {
        let cfg = inner.config.read();
        format!("{}-{worker_id}", cfg.name())
    };

    let inner2 = inner.clone();
    let spawned = thread::Builder::new().name(name).spawn(move || {
        {
            let mut workers = inner2.workers.lock();
            if let Some(entry) = workers.get_mut(&worker_id) {
                entry.thread = Some(thread::current());
            }
        }
        crate::worker::run_worker(inner2.clone(), worker_id);
    });

    match spawned {
        Ok(handle) => {
            if let Some(entry) = inner.workers.lock().get_mut(&worker_id) {
                entry.handle = Some(handle);
            }
        }
        Err(e) => {
            log::warn!("failed to spawn worker thread: {e}");
            inner.workers.lock().remove(&worker_id);
            inner.state.add_counts(rollback_hi, rollback_lo);
        }
    }
}

/// Guarantees `threads >= min(minThreads, maxThreads)` and that unmet
/// demand (`net_idle < 0`) gets a worker started, closing the race between
/// "last worker exits" and "new job just arrived" (spec §4.6).
pub(crate) fn ensure_threads(inner: &Arc<Inner>) {
    loop {
        let (min_threads, max_threads) = {
            let cfg = inner.config.read();
            (cfg.min_threads() as i32, cfg.max_threads() as i32)
        };
        let target_min = min_threads.min(max_threads);
        let (t, i) = inner.state.counters().get();
        if t == STOPPED {
            return;
        }
        if i < 0 && t < max_threads {
            if inner.state.add_counts(1, 0) {
                start_thread(inner, -1, 0);
            } else {
                return;
            }
        } else if t < target_min {
            if inner.state.add_counts(1, 1) {
                start_thread(inner, -1, -1);
            } else {
                return;
            }
        } else {
            return;
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("idle_threads", &self.idle_threads())
            .field("queue_size", &self.queue_size())
            .finish()
    }
}
