//! The `(threads, net_idle)` atomic pair at the center of the pool (spec §3, §4.1).
//!
//! Packed into a single 64-bit cell so every transition is one linearizable
//! CAS instead of two independently-racing ones. Hi/lo halves are signed
//! 32-bit integers; overflow is the caller's responsibility, same as the
//! `i32` arithmetic it stands in for.

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU64, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU64, Ordering};

/// `T == STOPPED` means "stopping/stopped": no further growth, workers treat
/// it as their exit signal.
pub const STOPPED: i32 = i32::MIN;

fn pack(hi: i32, lo: i32) -> u64 {
    ((hi as u32 as u64) << 32) | (lo as u32 as u64)
}

fn unpack(word: u64) -> (i32, i32) {
    ((word >> 32) as u32 as i32, word as u32 as i32)
}

/// A 64-bit atomic cell holding two signed 32-bit halves, CAS'd as a pair.
pub struct CounterPair {
    word: AtomicU64,
}

impl CounterPair {
    pub fn new(hi: i32, lo: i32) -> Self {
        Self {
            word: AtomicU64::new(pack(hi, lo)),
        }
    }

    /// Reads both halves as one snapshot.
    pub fn get(&self) -> (i32, i32) {
        unpack(self.word.load(Ordering::SeqCst))
    }

    pub fn get_hi(&self) -> i32 {
        self.get().0
    }

    pub fn get_lo(&self) -> i32 {
        self.get().1
    }

    pub fn set(&self, hi: i32, lo: i32) {
        self.word.store(pack(hi, lo), Ordering::SeqCst);
    }

    /// CAS on the full pair; `expected` must be a value previously observed
    /// via [`Self::get`].
    pub fn compare_exchange(
        &self,
        expected: (i32, i32),
        new_hi: i32,
        new_lo: i32,
    ) -> Result<(), (i32, i32)> {
        match self.word.compare_exchange(
            pack(expected.0, expected.1),
            pack(new_hi, new_lo),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(actual) => Err(unpack(actual)),
        }
    }

    /// Swaps in a new hi half, returning the old one. Used by `stop()` to
    /// capture the live-worker count while installing the stop sentinel.
    pub fn get_and_set_hi(&self, new_hi: i32) -> i32 {
        loop {
            let (hi, lo) = self.get();
            if self.compare_exchange((hi, lo), new_hi, lo).is_ok() {
                return hi;
            }
        }
    }

    /// Adds `delta` to hi, retrying on CAS contention. Leaves lo untouched.
    pub fn add_hi(&self, delta: i32) -> (i32, i32) {
        loop {
            let (hi, lo) = self.get();
            let new_hi = hi.wrapping_add(delta);
            if self.compare_exchange((hi, lo), new_hi, lo).is_ok() {
                return (new_hi, lo);
            }
        }
    }

    /// Adds `delta` to lo, retrying on CAS contention. Leaves hi untouched.
    pub fn add_lo(&self, delta: i32) -> (i32, i32) {
        loop {
            let (hi, lo) = self.get();
            let new_lo = lo.wrapping_add(delta);
            if self.compare_exchange((hi, lo), hi, new_lo).is_ok() {
                return (hi, new_lo);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        for (hi, lo) in [(0, 0), (1, -1), (i32::MIN, i32::MAX), (-5, 5)] {
            assert_eq!(unpack(pack(hi, lo)), (hi, lo));
        }
    }

    #[test]
    fn compare_exchange_fails_on_stale_expected() {
        let cp = CounterPair::new(1, 0);
        cp.set(2, 0);
        assert_eq!(cp.compare_exchange((1, 0), 9, 9), Err((2, 0)));
        assert_eq!(cp.get(), (2, 0));
    }

    #[test]
    fn add_hi_preserves_lo() {
        let cp = CounterPair::new(3, -2);
        let (hi, lo) = cp.add_hi(1);
        assert_eq!((hi, lo), (4, -2));
        assert_eq!(cp.get(), (4, -2));
    }

    #[test]
    fn add_lo_preserves_hi() {
        let cp = CounterPair::new(3, -2);
        let (hi, lo) = cp.add_lo(3);
        assert_eq!((hi, lo), (3, 1));
    }

    #[test]
    fn get_and_set_hi_returns_previous() {
        let cp = CounterPair::new(7, 2);
        let prev = cp.get_and_set_hi(STOPPED);
        assert_eq!(prev, 7);
        assert_eq!(cp.get(), (STOPPED, 2));
    }
}
