//! Pluggable shrink policy deciding when an idle worker should exit
//! (spec §3, §4.3). Modeled as a tagged variant with three arms per
//! spec §9, rather than a trait object, since the set of strategies is
//! closed and fixed by `idle_timeout`/`max_shrink_count` at selection time.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static CLOCK_BASE: Lazy<Instant> = Lazy::new(Instant::now);

fn now_nanos() -> u64 {
    CLOCK_BASE.elapsed().as_nanos() as u64
}

/// Per-worker idle-age storage for [`LinearShrink`], indexed by worker id
/// rather than held in thread-local storage, so `prune` can be invoked on a
/// slot from outside the worker that owns it if ever needed (spec §9).
struct WorkerSlots {
    idle_since_nanos: Mutex<Vec<Option<u64>>>,
}

impl WorkerSlots {
    fn new(capacity: usize) -> Self {
        Self {
            idle_since_nanos: Mutex::new(vec![None; capacity]),
        }
    }

    fn ensure_capacity(&self, worker_id: usize) {
        let mut slots = self.idle_since_nanos.lock();
        if worker_id >= slots.len() {
            slots.resize(worker_id + 1, None);
        }
    }

    fn set(&self, worker_id: usize, value: Option<u64>) {
        self.ensure_capacity(worker_id);
        self.idle_since_nanos.lock()[worker_id] = value;
    }

    fn get(&self, worker_id: usize) -> Option<u64> {
        self.ensure_capacity(worker_id);
        self.idle_since_nanos.lock()[worker_id]
    }
}

/// Global rate limit: at most one eviction per `idle_timeout` interval,
/// regardless of how many workers notice eviction eligibility at once.
pub struct DefaultShrink {
    last_shrink_nanos: AtomicU64,
}

impl DefaultShrink {
    fn new() -> Self {
        Self {
            last_shrink_nanos: AtomicU64::new(now_nanos()),
        }
    }

    fn init(&self) {
        self.last_shrink_nanos.store(now_nanos(), Ordering::SeqCst);
    }

    fn evict(&self, it_nanos: u64) -> bool {
        loop {
            let last = self.last_shrink_nanos.load(Ordering::SeqCst);
            let now = now_nanos();
            if now.saturating_sub(last) <= it_nanos {
                return false;
            }
            // Advance the timeline by at least one interval, never further
            // behind than one interval: this is what prevents both batch
            // evictions near the same instant and timeline gaps under load.
            let advanced = (last + it_nanos).max(now.saturating_sub(it_nanos));
            if self
                .last_shrink_nanos
                .compare_exchange(last, advanced, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

struct ShrinkWindow {
    start_nanos: u64,
    evicted: u32,
}

/// Per-thread TTL plus a per-interval eviction quota greater than one.
pub struct LinearShrink {
    slots: WorkerSlots,
    window: Mutex<ShrinkWindow>,
}

impl LinearShrink {
    fn new(capacity: usize) -> Self {
        Self {
            slots: WorkerSlots::new(capacity),
            window: Mutex::new(ShrinkWindow {
                start_nanos: now_nanos(),
                evicted: 0,
            }),
        }
    }

    fn on_idle(&self, worker_id: usize) -> bool {
        self.slots.set(worker_id, Some(now_nanos()));
        true
    }

    fn on_busy(&self, worker_id: usize) -> bool {
        self.slots.set(worker_id, None);
        false
    }

    fn evict(&self, worker_id: usize, it_nanos: u64, max_evict: u32) -> bool {
        let idle_since = match self.slots.get(worker_id) {
            Some(t) => t,
            None => return false,
        };
        let now = now_nanos();
        if now.saturating_sub(idle_since) < it_nanos {
            return false;
        }
        let mut window = self.window.lock();
        if now.saturating_sub(window.start_nanos) > it_nanos {
            window.start_nanos = now;
            window.evicted = 0;
        }
        if window.evicted < max_evict {
            window.evicted += 1;
            drop(window);
            self.slots.set(worker_id, None);
            true
        } else {
            false
        }
    }

    fn prune(&self, worker_id: usize) {
        self.slots.set(worker_id, None);
    }
}

/// Policy object a worker consults when transitioning idle/busy and when
/// deciding whether it may exit.
pub enum ShrinkStrategy {
    /// Used when `idle_timeout == 0`: shrink is disabled entirely.
    Noop,
    Default(DefaultShrink),
    Linear(LinearShrink),
}

impl ShrinkStrategy {
    /// Selects the strategy implied by the current tuning, per spec §4.3.
    pub fn select(idle_timeout_millis: u64, max_shrink_count: u32, worker_capacity: usize) -> Self {
        if idle_timeout_millis == 0 {
            ShrinkStrategy::Noop
        } else if max_shrink_count <= 1 {
            ShrinkStrategy::Default(DefaultShrink::new())
        } else {
            ShrinkStrategy::Linear(LinearShrink::new(worker_capacity))
        }
    }

    /// Resets the baseline timestamp. Called once at pool start and again
    /// every time a new worker spawns, to guard against thrash right after
    /// growth.
    pub fn init(&self, _worker_id: usize) {
        if let ShrinkStrategy::Default(d) = self {
            d.init();
        }
    }

    /// Called when a worker transitions busy -> idle. Returns whether
    /// `prune()` must be called on any exit path other than a successful
    /// `evict`.
    pub fn on_idle(&self, worker_id: usize) -> bool {
        match self {
            ShrinkStrategy::Noop => false,
            ShrinkStrategy::Default(_) => true,
            ShrinkStrategy::Linear(l) => l.on_idle(worker_id),
        }
    }

    /// Called when a worker transitions idle -> busy. Always `false`.
    pub fn on_busy(&self, worker_id: usize) -> bool {
        match self {
            ShrinkStrategy::Noop => false,
            ShrinkStrategy::Default(_) => false,
            ShrinkStrategy::Linear(l) => l.on_busy(worker_id),
        }
    }

    /// Asks "may I exit now?". On `true` the strategy has already accounted
    /// for the shrinkage and the caller must exit without calling `prune`.
    pub fn evict(&self, worker_id: usize, idle_timeout: Duration, max_evict: u32) -> bool {
        let it_nanos = idle_timeout.as_nanos() as u64;
        match self {
            ShrinkStrategy::Noop => false,
            ShrinkStrategy::Default(d) => d.evict(it_nanos),
            ShrinkStrategy::Linear(l) => l.evict(worker_id, it_nanos, max_evict),
        }
    }

    /// Cleans up per-worker residue when a worker exits through a path
    /// other than a successful `evict` (panic, shutdown, spurious wakeup).
    pub fn prune(&self, worker_id: usize) {
        if let ShrinkStrategy::Linear(l) = self {
            l.prune(worker_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn noop_never_evicts() {
        let s = ShrinkStrategy::Noop;
        assert!(!s.on_idle(0));
        assert!(!s.evict(0, Duration::from_millis(1), 1));
    }

    #[test]
    fn default_shrink_caps_at_one_per_interval() {
        let s = ShrinkStrategy::select(10, 1, 4);
        s.init(0);
        sleep(Duration::from_millis(15));
        assert!(s.evict(0, Duration::from_millis(10), 1));
        // Immediately after a successful evict the timeline just advanced,
        // so a second immediate eviction attempt must not also succeed.
        assert!(!s.evict(0, Duration::from_millis(10), 1));
    }

    #[test]
    fn linear_shrink_respects_per_worker_ttl() {
        let s = ShrinkStrategy::select(10, 4, 4);
        s.on_idle(0);
        // Not idle long enough yet.
        assert!(!s.evict(0, Duration::from_millis(50), 4));
        sleep(Duration::from_millis(15));
        assert!(s.evict(0, Duration::from_millis(10), 4));
    }

    #[test]
    fn linear_shrink_caps_evictions_per_window() {
        let s = ShrinkStrategy::select(5, 2, 8);
        for id in 0..4 {
            s.on_idle(id);
        }
        sleep(Duration::from_millis(10));
        let evicted: usize = (0..4)
            .filter(|&id| s.evict(id, Duration::from_millis(5), 2))
            .count();
        assert_eq!(evicted, 2);
    }

    #[test]
    fn on_busy_clears_linear_idle_age() {
        let s = ShrinkStrategy::select(10, 4, 2);
        s.on_idle(0);
        s.on_busy(0);
        sleep(Duration::from_millis(15));
        assert!(!s.evict(0, Duration::from_millis(10), 4));
    }
}
