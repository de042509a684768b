//! A bounded, elastic worker thread pool for request-processing servers.
//!
//! Workers grow on demand up to `max_threads`, shrink back toward
//! `min_threads` once idle past `idle_timeout`, and the whole pool can be
//! asked to stop gracefully with a deadline. See [`ThreadPool`] for the
//! public surface.

mod config;
mod counters;
mod diagnostics;
mod error;
mod pool;
mod queue;
mod reservation;
mod shrink;
mod state;
mod worker;

pub use config::{PoolConfig, RESERVED_HEURISTIC};
pub use diagnostics::{PoolDump, StackTag, WorkerDump};
pub use error::PoolError;
pub use pool::ThreadPool;
pub use queue::{BlockingQueue, ChannelQueue, Closeable, FnJob, Job, JobBox, NoopJob};
pub use reservation::{AlwaysFalse, FixedReservation, ReservationFacility};
