//! Scenario coverage for pool growth/shrink/rejection/stop/drain behavior.
//! Timing-sensitive cases run `#[serial]` so they aren't scheduled against
//! each other on a busy CI box.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use elastic_pool::{BlockingQueue, ChannelQueue, Closeable, Job, PoolConfig, ThreadPool};
use serial_test::serial;

fn init_logging() {
    static START: std::sync::Once = std::sync::Once::new();
    START.call_once(|| {
        let _ = env_logger::try_init();
    });
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

struct CloseTrackingJob {
    ran: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Job for CloseTrackingJob {
    fn run(self: Box<Self>) {
        self.ran.fetch_add(1, Ordering::SeqCst);
    }

    fn as_closeable(&mut self) -> Option<&mut dyn Closeable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Closeable for CloseTrackingJob {
    fn close(&mut self) -> std::io::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
#[serial]
fn burst_grows_to_max_and_every_job_completes() {
    init_logging();
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(2);
    cfg.set_max_threads(4).unwrap();
    cfg.set_idle_timeout_millis(2_000);
    let pool = ThreadPool::new(cfg).unwrap();
    pool.start().unwrap();
    assert_eq!(pool.threads(), 2);

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let completed = completed.clone();
        pool.execute(move || {
            std::thread::sleep(Duration::from_millis(80));
            completed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    // The burst submits faster than any 80ms job finishes, so the pool
    // should have grown to its ceiling by the time submission is done.
    assert_eq!(pool.threads(), 4);

    assert!(wait_until(Duration::from_secs(5), || {
        completed.load(Ordering::SeqCst) == 10
    }));
    assert!(pool.threads() >= 2);

    pool.stop(Duration::from_secs(2)).unwrap();
    pool.join();
}

#[test]
#[serial]
fn idle_pool_shrinks_back_to_min_threads() {
    init_logging();
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(1);
    cfg.set_max_threads(4).unwrap();
    cfg.set_idle_timeout_millis(40);
    cfg.set_max_shrink_count(1).unwrap();
    let pool = ThreadPool::new(cfg).unwrap();
    pool.start().unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let completed = completed.clone();
        pool.execute(move || {
            std::thread::sleep(Duration::from_millis(60));
            completed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        completed.load(Ordering::SeqCst) == 4
    }));

    assert!(wait_until(Duration::from_secs(3), || pool.threads() == 1));

    pool.stop(Duration::from_secs(2)).unwrap();
    pool.join();
}

#[test]
#[serial]
fn shrink_quota_bounds_eviction_rate_per_interval() {
    init_logging();
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(1);
    cfg.set_max_threads(8).unwrap();
    cfg.set_idle_timeout_millis(40);
    cfg.set_max_shrink_count(2).unwrap();
    let pool = ThreadPool::new(cfg).unwrap();
    pool.start().unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let completed = completed.clone();
        pool.execute(move || {
            std::thread::sleep(Duration::from_millis(80));
            completed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        completed.load(Ordering::SeqCst) == 8
    }));

    let peak = pool.threads();
    assert!(peak >= 4, "burst should have grown well past min_threads");

    // The per-interval quota should make shrinkage gradual, not a single
    // batch collapse straight to min_threads right after the first
    // interval elapses.
    std::thread::sleep(Duration::from_millis(60));
    assert!(
        pool.threads() > 1,
        "quota of 2 per interval should not have drained all {peak} workers yet"
    );

    assert!(wait_until(Duration::from_secs(3), || pool.threads() == 1));

    pool.stop(Duration::from_secs(2)).unwrap();
    pool.join();
}

#[test]
#[serial]
fn bounded_queue_rejects_without_leaking_counters() {
    init_logging();
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(1);
    cfg.set_max_threads(1).unwrap();
    cfg.set_idle_timeout_millis(5_000);
    let queue: Arc<dyn BlockingQueue> = Arc::new(ChannelQueue::new(Some(1)));
    let pool = ThreadPool::with_queue(cfg, queue).unwrap();
    pool.start().unwrap();
    assert_eq!(pool.threads(), 1);

    // Occupies the only worker.
    pool.execute(|| std::thread::sleep(Duration::from_millis(200)))
        .unwrap();
    // Give the worker a moment to actually dequeue that job, so the next
    // submission lands in an empty, not merely non-full, queue.
    std::thread::sleep(Duration::from_millis(30));
    // Fills the one-deep queue behind it.
    pool.execute(|| std::thread::sleep(Duration::from_millis(50)))
        .unwrap();
    // Queue is now full: this one must be rejected.
    let rejected = pool.execute(|| {});
    assert!(rejected.is_err());

    assert_eq!(pool.threads(), 1);

    pool.stop(Duration::from_secs(2)).unwrap();
    pool.join();
}

#[test]
#[serial]
fn stop_with_short_timeout_does_not_block_on_stuck_workers() {
    init_logging();
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(1);
    cfg.set_max_threads(1).unwrap();
    let pool = ThreadPool::new(cfg).unwrap();
    pool.start().unwrap();

    pool.execute(|| std::thread::sleep(Duration::from_secs(5)))
        .unwrap();
    // Give the worker a moment to actually pick up the job.
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    pool.stop(Duration::from_millis(300)).unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(2));
    assert!(!pool.is_running());
}

#[test]
#[serial]
fn queued_closeable_jobs_are_closed_exactly_once_without_running() {
    init_logging();
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(0);
    cfg.set_max_threads(1).unwrap();
    cfg.set_idle_timeout_millis(5_000);
    let queue: Arc<dyn BlockingQueue> = Arc::new(ChannelQueue::new(Some(8)));
    let pool = ThreadPool::with_queue(cfg, queue).unwrap();
    pool.start().unwrap();

    // Occupies the single worker the moment it spawns, so the closeable
    // jobs behind it never get a chance to be dequeued.
    pool.execute(|| std::thread::sleep(Duration::from_millis(300)))
        .unwrap();
    std::thread::sleep(Duration::from_millis(30));

    let ran = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        pool.execute_job(Box::new(CloseTrackingJob {
            ran: ran.clone(),
            closed: closed.clone(),
        }))
        .unwrap();
    }

    pool.stop(Duration::ZERO).unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(closed.load(Ordering::SeqCst), 3);
}
