use thiserror::Error;

/// Failures the pool surfaces synchronously to a caller.
///
/// `JobThrew`, `StuckWorker`, `CloseFailed`, and the internal `Interrupted`
/// condition are intentionally absent here: the pool logs those at warn and
/// keeps running (draining continues past a failed `close()`) rather than
/// handing them back to anyone.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is stopping/stopped, or a bounded queue refused the job.
    #[error("job rejected: pool is stopped or at capacity")]
    Rejected,

    /// A config setter observed an invalid combination of values.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
