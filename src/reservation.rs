//! Bridge to the external reservation facility (spec §4.8, Out-of-scope:
//! "the reservation facility that leases/returns ready workers — we specify
//! only the contract against it").

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// A worker-leasing facility the pool can ask to run a task without
/// enqueuing or blocking. The pool owns only this boundary; any real
/// leasing/return policy lives in the collaborator that implements it.
pub trait ReservationFacility: Send + Sync {
    /// Attempts to hand `task` to a reserved worker. Must never block and
    /// must never enqueue: `false` means the caller should fall back to
    /// `execute` or reject.
    fn try_execute(&self, task: Box<dyn FnOnce() + Send>) -> bool;

    /// Total capacity this facility was configured with.
    fn capacity(&self) -> u32;

    /// Workers currently idle and available for immediate dispatch.
    fn available(&self) -> i32;

    /// Workers currently leased out (capacity minus available), used by
    /// `PoolState::utilized_threads`/`utilization_rate`.
    fn leased(&self) -> i32 {
        self.capacity() as i32 - self.available()
    }
}

/// Installed when `reserved_threads == 0`: `try_execute` always fails,
/// forcing every submission through the normal queue.
pub struct AlwaysFalse;

impl ReservationFacility for AlwaysFalse {
    fn try_execute(&self, _task: Box<dyn FnOnce() + Send>) -> bool {
        false
    }

    fn capacity(&self) -> u32 {
        0
    }

    fn available(&self) -> i32 {
        0
    }
}

/// A minimal in-memory reservation facility: a fixed pool of permits, each
/// permit running its task on a throwaway thread and releasing itself on
/// completion. Usable as a default so `reservedThreads` is exercisable
/// without a real external leasing subsystem.
pub struct FixedReservation {
    capacity: u32,
    available: Arc<AtomicI32>,
}

impl FixedReservation {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            available: Arc::new(AtomicI32::new(capacity as i32)),
        }
    }
}

impl ReservationFacility for FixedReservation {
    fn try_execute(&self, task: Box<dyn FnOnce() + Send>) -> bool {
        loop {
            let avail = self.available.load(Ordering::SeqCst);
            if avail <= 0 {
                return false;
            }
            if self
                .available
                .compare_exchange(avail, avail - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        let available = self.available.clone();
        std::thread::spawn(move || {
            task();
            available.fetch_add(1, Ordering::SeqCst);
        });
        true
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn available(&self) -> i32 {
        self.available.load(Ordering::SeqCst)
    }
}
