//! Derived observers over the `(threads, net_idle)` counter pair (spec §4.4).

use crate::counters::{CounterPair, STOPPED};

/// Owns the counter pair and exposes the read-only observables derived from
/// it. Values that depend on external collaborators (the reservation
/// facility) are threaded in by the caller rather than stored here, so this
/// type stays a pure view over `(T, I)`.
pub struct PoolState {
    counters: CounterPair,
}

impl PoolState {
    pub fn new(initial_threads: i32, initial_idle: i32) -> Self {
        Self {
            counters: CounterPair::new(initial_threads, initial_idle),
        }
    }

    pub fn counters(&self) -> &CounterPair {
        &self.counters
    }

    /// Applies `(d_hi, d_lo)` to the pair, CAS-retrying until it lands.
    /// If the pool is already stopped (`hi == STOPPED`), `hi` stays pinned
    /// at the sentinel and only `lo` moves — callers use the `false` return
    /// to tell a log-only condition apart from a normal update (spec §4.4).
    pub fn add_counts(&self, d_hi: i32, d_lo: i32) -> bool {
        loop {
            let (hi, lo) = self.counters.get();
            if hi == STOPPED {
                let new_lo = lo.wrapping_add(d_lo);
                if self.counters.compare_exchange((hi, lo), STOPPED, new_lo).is_ok() {
                    return false;
                }
            } else {
                let new_hi = hi.wrapping_add(d_hi);
                let new_lo = lo.wrapping_add(d_lo);
                if self
                    .counters
                    .compare_exchange((hi, lo), new_hi, new_lo)
                    .is_ok()
                {
                    return true;
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.counters.get_hi() == STOPPED
    }

    pub fn threads(&self) -> i32 {
        self.counters.get_hi().max(0)
    }

    pub fn net_idle(&self) -> i32 {
        self.counters.get_lo()
    }

    pub fn queue_size(&self) -> i32 {
        (-self.net_idle()).max(0)
    }

    /// Idle workers, not counting reserved ones.
    pub fn idle_threads(&self) -> i32 {
        self.net_idle().max(0)
    }

    pub fn ready_threads(&self, available_reserved: i32) -> i32 {
        self.idle_threads() + available_reserved
    }

    pub fn busy_threads(&self, available_reserved: i32, leased: i32) -> i32 {
        (self.threads() - self.ready_threads(available_reserved) - leased).max(0)
    }

    pub fn utilized_threads(&self, available_reserved: i32, leased: i32) -> i32 {
        self.threads() - leased - self.ready_threads(available_reserved)
    }

    /// `(maxThreads - threads) + readyThreads - queueSize <= threshold`
    pub fn is_low_on_threads(
        &self,
        max_threads: i32,
        available_reserved: i32,
        low_threads_threshold: i32,
    ) -> bool {
        (max_threads - self.threads()) + self.ready_threads(available_reserved) - self.queue_size()
            <= low_threads_threshold
    }

    pub fn utilization_rate(&self, max_threads: i32, available_reserved: i32, leased: i32) -> f64 {
        let denom = max_threads - leased;
        if denom <= 0 {
            return 0.0;
        }
        self.utilized_threads(available_reserved, leased) as f64 / denom as f64
    }
}
