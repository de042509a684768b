//! The blocking FIFO job queue contract (spec §2 C2) plus one concrete,
//! `crossbeam-channel`-backed implementation (SPEC_FULL §2 C12).
//!
//! The pool core only ever talks to the [`BlockingQueue`] trait; the queue
//! implementation itself is a collaborator, not the hard part of this crate.

use std::any::Any;
use std::time::Duration;

/// A unit of work submitted to the pool.
///
/// `as_closeable` is a capability query, not a declaration every job must
/// make: jobs that don't care about being drained unexecuted simply inherit
/// the default `None`.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);

    /// Returns this job as a [`Closeable`] if it implements that capability,
    /// so `stop()` can close queued-but-undrained jobs without requiring
    /// every job type to opt in.
    fn as_closeable(&mut self) -> Option<&mut dyn Closeable> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Capability for a job that holds a resource it must release if it is
/// drained from the queue without ever running.
pub trait Closeable {
    fn close(&mut self) -> std::io::Result<()>;
}

pub type JobBox = Box<dyn Job>;

/// A do-nothing job offered into the queue solely to wake a timed poller
/// during shutdown (spec §4.7 step 3).
pub struct NoopJob;

impl Job for NoopJob {
    fn run(self: Box<Self>) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps any `FnOnce() + Send` as a `Job` with no closeable capability.
pub struct FnJob<F: FnOnce() + Send + 'static>(pub Option<F>);

impl<F: FnOnce() + Send + 'static> FnJob<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce() + Send + 'static> Job for FnJob<F> {
    fn run(mut self: Box<Self>) {
        if let Some(f) = self.0.take() {
            f();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The external queue boundary: FIFO with blocking `take`, timed `poll`,
/// non-blocking `offer`/`poll_now`, and a drain snapshot for shutdown.
pub trait BlockingQueue: Send + Sync {
    /// Non-blocking enqueue. Returns the job back on rejection (queue full
    /// or closed) so the caller can roll back its counter reservation.
    fn offer(&self, job: JobBox) -> Result<(), JobBox>;

    /// Blocks until a job is available or the queue is closed.
    fn take(&self) -> Option<JobBox>;

    /// Blocks up to `timeout` for a job.
    fn poll_timed(&self, timeout: Duration) -> Option<JobBox>;

    /// Returns immediately with a job if one is ready, `None` otherwise.
    fn poll_now(&self) -> Option<JobBox>;

    /// Drains everything currently queued without blocking. Used only
    /// during stop, after the stop sentinel is already live, so this never
    /// races a producer's `offer` for the same job twice.
    fn drain_snapshot(&self) -> Vec<JobBox>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded (or unbounded) FIFO queue over `crossbeam-channel`.
pub struct ChannelQueue {
    sender: crossbeam_channel::Sender<JobBox>,
    receiver: crossbeam_channel::Receiver<JobBox>,
}

impl ChannelQueue {
    /// `capacity = None` creates an unbounded queue (never rejects on `offer`).
    pub fn new(capacity: Option<usize>) -> Self {
        let (sender, receiver) = match capacity {
            Some(cap) => crossbeam_channel::bounded(cap),
            None => crossbeam_channel::unbounded(),
        };
        Self { sender, receiver }
    }
}

impl BlockingQueue for ChannelQueue {
    fn offer(&self, job: JobBox) -> Result<(), JobBox> {
        self.sender.try_send(job).map_err(|e| e.into_inner())
    }

    fn take(&self) -> Option<JobBox> {
        self.receiver.recv().ok()
    }

    fn poll_timed(&self, timeout: Duration) -> Option<JobBox> {
        self.receiver.recv_timeout(timeout).ok()
    }

    fn poll_now(&self) -> Option<JobBox> {
        self.receiver.try_recv().ok()
    }

    fn drain_snapshot(&self) -> Vec<JobBox> {
        let mut drained = Vec::new();
        while let Ok(job) = self.receiver.try_recv() {
            drained.push(job);
        }
        drained
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }
}
