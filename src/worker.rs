//! The per-worker runner loop (spec §4.5): poll for a job, run it, opportunistically
//! drain what the queue offers next without re-polling, then ask the shrink
//! strategy whether this worker may retire.

use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::counters::STOPPED;
use crate::diagnostics::{capture_backtrace, StackTag};
use crate::pool::{ensure_threads, Inner};
use crate::queue::{BlockingQueue, JobBox};

/// Runs `hook` against `job`, catching a panic so one bad job never takes a
/// worker down with it (spec §4.5.1).
fn run_job(inner: &Arc<Inner>, job: JobBox) {
    let hook = inner.run_job_hook.clone();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(job)));
    if let Err(payload) = outcome {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        log::warn!("kind=job_panicked\tmessage={message}");
    }
}

/// Records the worker's own state and, when `detailed_dump` is on, its own
/// freshly captured stack — capturing a *remote* thread's backtrace isn't
/// something Rust can do safely, so this only ever runs on the worker's own
/// thread, at its own checkpoints (spec §6's `detailed_dump` tuning knob).
fn set_tag(inner: &Arc<Inner>, worker_id: usize, tag: StackTag) {
    let detailed = inner.config.read().detailed_dump();
    if let Some(entry) = inner.workers.lock().get(&worker_id) {
        *entry.tag.lock() = tag;
        *entry.backtrace.lock() = if detailed {
            Some(capture_backtrace())
        } else {
            None
        };
    }
}

fn clear_interrupt(inner: &Arc<Inner>, worker_id: usize) {
    if let Some(entry) = inner.workers.lock().get(&worker_id) {
        entry.interrupted.store(false, Ordering::SeqCst);
    }
}

fn is_interrupted(inner: &Arc<Inner>, worker_id: usize) -> bool {
    inner
        .workers
        .lock()
        .get(&worker_id)
        .map(|entry| entry.interrupted.load(Ordering::SeqCst))
        .unwrap_or(false)
}

/// One slice of a blocking wait for a job. `crossbeam_channel`'s blocking
/// `recv`/`recv_timeout` don't wake on `Thread::unpark`, so a flag set by
/// `interrupt_thread` or stop's escalation step can't interrupt a single
/// long `poll_timed` call — it has to be noticed between shorter ones.
const INTERRUPT_POLL_SLICE: Duration = Duration::from_millis(200);

/// Waits for a job up to `deadline` (or forever if `None`), but never blocks
/// longer than one slice at a time so an interrupt or the stop sentinel gets
/// picked up promptly instead of only after the full wait elapses.
fn poll_for_job(inner: &Arc<Inner>, worker_id: usize, deadline: Option<Instant>) -> Option<JobBox> {
    loop {
        if is_interrupted(inner, worker_id) || inner.state.counters().get_hi() == STOPPED {
            return None;
        }
        let slice = match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                remaining.min(INTERRUPT_POLL_SLICE)
            }
            None => INTERRUPT_POLL_SLICE,
        };
        if let Some(job) = inner.queue.poll_timed(slice) {
            return Some(job);
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return None;
            }
        }
    }
}

/// Runs the `prune`/remove/decrement/`ensure_threads` teardown exactly once,
/// whether the loop below exits normally or a panic somehow escapes
/// `run_job`'s own `catch_unwind` (spec: a worker must never disappear while
/// still counted live).
struct WorkerGuard<'a> {
    inner: &'a Arc<Inner>,
    worker_id: usize,
    prune_on_exit: Cell<bool>,
    was_idle: Cell<bool>,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        let shrink = self.inner.current_shrink();
        if self.prune_on_exit.get() {
            shrink.prune(self.worker_id);
        }
        self.inner.workers.lock().remove(&self.worker_id);
        let was_idle = self.was_idle.get();
        self.inner
            .state
            .add_counts(-1, if was_idle { -1 } else { 0 });
        ensure_threads(self.inner);
    }
}

pub(crate) fn run_worker(inner: Arc<Inner>, worker_id: usize) {
    let guard = WorkerGuard {
        inner: &inner,
        worker_id,
        prune_on_exit: Cell::new(inner.current_shrink().on_idle(worker_id)),
        was_idle: Cell::new(true),
    };
    set_tag(&inner, worker_id, StackTag::Idle);

    loop {
        // Re-fetched every iteration, not captured once: `set_idle_timeout_millis`/
        // `set_max_shrink_count` reselect the strategy at runtime (spec §6), and a
        // worker holding a stale `Arc<ShrinkStrategy>` would never see it — worse,
        // `WorkerGuard::drop` already fetches fresh, so a stale capture here would
        // prune a *different* instance than the one tracking this worker's idle state.
        let shrink = inner.current_shrink();

        if inner.state.counters().get_hi() == STOPPED {
            break;
        }

        let idle_timeout_millis = inner.config.read().idle_timeout_millis();
        set_tag(&inner, worker_id, StackTag::Selecting);
        let deadline = if idle_timeout_millis > 0 {
            Some(Instant::now() + Duration::from_millis(idle_timeout_millis))
        } else {
            None
        };
        let job = poll_for_job(&inner, worker_id, deadline);

        if let Some(mut job) = job {
            set_tag(&inner, worker_id, StackTag::Accepting);
            guard.prune_on_exit.set(shrink.on_busy(worker_id));
            guard.was_idle.set(false);

            loop {
                run_job(&inner, job);
                if !inner.state.add_counts(0, 1) {
                    // Pool is stopping; the top-of-loop check below will exit.
                    break;
                }
                match inner.queue.poll_now() {
                    Some(next) => job = next,
                    None => break,
                }
            }

            guard.was_idle.set(true);
            guard.prune_on_exit.set(shrink.on_idle(worker_id));
            set_tag(&inner, worker_id, StackTag::Idle);
        }

        clear_interrupt(&inner, worker_id);

        if inner.state.counters().get_hi() == STOPPED {
            break;
        }

        let max_shrink = inner.config.read().max_shrink_count();
        let idle_timeout = Duration::from_millis(idle_timeout_millis.max(1));
        if shrink.evict(worker_id, idle_timeout, max_shrink) {
            guard.prune_on_exit.set(false);
            break;
        }
    }
    // `guard` drops here, performing the exit accounting exactly once.
}
