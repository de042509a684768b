//! Thread/pool dump operations (spec §6). Grounded in the teacher's
//! `signal_handler.rs`/`deadlock_detector.rs` TSV-style `key=value` log
//! lines and their use of `backtrace` for stack capture.

use std::fmt;

/// Compressed stack tag for a worker, shown in a pool-wide dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackTag {
    Idle,
    Reserved,
    Selecting,
    Accepting,
    Unknown,
}

impl fmt::Display for StackTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackTag::Idle => "IDLE",
            StackTag::Reserved => "RESERVED",
            StackTag::Selecting => "SELECTING",
            StackTag::Accepting => "ACCEPTING",
            StackTag::Unknown => "",
        };
        f.write_str(s)
    }
}

/// A snapshot of one worker for a pool-wide dump.
#[derive(Debug, Clone)]
pub struct WorkerDump {
    pub worker_id: usize,
    pub tag: StackTag,
    pub backtrace: Option<String>,
}

/// A full pool snapshot. Kept structured (rather than a single formatted
/// string) so embedders can render it however they like; `Display` gives
/// the TSV-style line-per-fact rendering the teacher's own diagnostics use.
#[derive(Debug, Clone)]
pub struct PoolDump {
    pub threads: i32,
    pub idle_threads: i32,
    pub queue_size: i32,
    pub workers: Vec<WorkerDump>,
    pub queued_jobs: Option<usize>,
}

impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "kind=pool_dump\tthreads={}\tidle={}\tqueue_size={}",
            self.threads, self.idle_threads, self.queue_size
        )?;
        for w in &self.workers {
            writeln!(
                f,
                "kind=worker_dump\tworker_id={}\ttag={}",
                w.worker_id, w.tag
            )?;
            if let Some(bt) = &w.backtrace {
                for (i, frame) in bt.lines().enumerate() {
                    writeln!(
                        f,
                        "kind=worker_backtrace\tworker_id={}\tframe_id={i}\tframe_data={}",
                        w.worker_id,
                        frame.trim()
                    )?;
                }
            }
        }
        if let Some(n) = self.queued_jobs {
            writeln!(f, "kind=queue_dump\tqueued_jobs={n}")?;
        }
        Ok(())
    }
}

/// Captures the calling thread's backtrace as a debug string. Used both for
/// `dump_thread` and for logging a `StuckWorker` condition after the stop
/// grace period (spec §7).
#[cfg(unix)]
pub fn capture_backtrace() -> String {
    format!("{:?}", backtrace::Backtrace::new())
}

#[cfg(not(unix))]
pub fn capture_backtrace() -> String {
    "<backtrace unavailable on this platform>".to_string()
}
