use crate::error::PoolError;

/// Sentinel for [`PoolConfig::reserved_threads`] meaning "size heuristically".
pub const RESERVED_HEURISTIC: i32 = -1;

/// Immutable-unless-noted tuning for a [`crate::pool::ThreadPool`].
///
/// Most fields are mutable at runtime via the setters below; `reserved_threads`
/// and `name` may only be changed while the pool is not running (enforced by
/// the owning `ThreadPool`, not by this struct in isolation).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    min_threads: u32,
    max_threads: u32,
    idle_timeout_millis: u64,
    reserved_threads: i32,
    max_shrink_count: u32,
    stop_timeout_millis: u64,
    low_threads_threshold: i32,
    daemon: bool,
    name: String,
    detailed_dump: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 4,
            max_threads: 200,
            idle_timeout_millis: 60_000,
            reserved_threads: RESERVED_HEURISTIC,
            max_shrink_count: 1,
            stop_timeout_millis: 30_000,
            low_threads_threshold: 10,
            daemon: false,
            name: "pool".to_string(),
            detailed_dump: false,
        }
    }
}

impl PoolConfig {
    pub fn min_threads(&self) -> u32 {
        self.min_threads
    }

    pub fn max_threads(&self) -> u32 {
        self.max_threads
    }

    pub fn idle_timeout_millis(&self) -> u64 {
        self.idle_timeout_millis
    }

    pub fn reserved_threads(&self) -> i32 {
        self.reserved_threads
    }

    pub fn max_shrink_count(&self) -> u32 {
        self.max_shrink_count
    }

    pub fn stop_timeout_millis(&self) -> u64 {
        self.stop_timeout_millis
    }

    pub fn low_threads_threshold(&self) -> i32 {
        self.low_threads_threshold
    }

    pub fn daemon(&self) -> bool {
        self.daemon
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detailed_dump(&self) -> bool {
        self.detailed_dump
    }

    /// Sets `min_threads`, raising `max_threads` to match if it would
    /// otherwise be violated (spec: "setting min > max raises max").
    pub fn set_min_threads(&mut self, min: u32) {
        self.min_threads = min;
        if self.max_threads < min {
            self.max_threads = min;
        }
    }

    /// Sets `max_threads`. Rejects a value below `min_threads`.
    pub fn set_max_threads(&mut self, max: u32) -> Result<(), PoolError> {
        if max < self.min_threads {
            return Err(PoolError::InvalidConfig(format!(
                "max_threads ({max}) below min_threads ({})",
                self.min_threads
            )));
        }
        if max == 0 {
            return Err(PoolError::InvalidConfig("max_threads must be >= 1".into()));
        }
        self.max_threads = max;
        Ok(())
    }

    pub fn set_idle_timeout_millis(&mut self, millis: u64) {
        self.idle_timeout_millis = millis;
    }

    /// Settable only while the pool is not running; enforced by the caller.
    pub fn set_reserved_threads(&mut self, reserved: i32) -> Result<(), PoolError> {
        if reserved < RESERVED_HEURISTIC {
            return Err(PoolError::InvalidConfig(format!(
                "reserved_threads ({reserved}) must be >= -1"
            )));
        }
        self.reserved_threads = reserved;
        Ok(())
    }

    pub fn set_max_shrink_count(&mut self, count: u32) -> Result<(), PoolError> {
        if count < 1 {
            return Err(PoolError::InvalidConfig(
                "max_shrink_count must be >= 1".into(),
            ));
        }
        self.max_shrink_count = count;
        Ok(())
    }

    pub fn set_stop_timeout_millis(&mut self, millis: u64) {
        self.stop_timeout_millis = millis;
    }

    pub fn set_low_threads_threshold(&mut self, threshold: i32) {
        self.low_threads_threshold = threshold;
    }

    pub fn set_daemon(&mut self, daemon: bool) {
        self.daemon = daemon;
    }

    /// Settable only while the pool is not running; enforced by the caller.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_detailed_dump(&mut self, detailed: bool) {
        self.detailed_dump = detailed;
    }

    /// Validates the full config, e.g. after construction via `Default` plus
    /// field assignment rather than through the setters.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_threads < self.min_threads {
            return Err(PoolError::InvalidConfig(
                "max_threads must be >= min_threads".into(),
            ));
        }
        if self.max_threads == 0 {
            return Err(PoolError::InvalidConfig("max_threads must be >= 1".into()));
        }
        if self.max_shrink_count < 1 {
            return Err(PoolError::InvalidConfig(
                "max_shrink_count must be >= 1".into(),
            ));
        }
        if self.reserved_threads < RESERVED_HEURISTIC {
            return Err(PoolError::InvalidConfig(
                "reserved_threads must be >= -1".into(),
            ));
        }
        Ok(())
    }

    /// Resolves `reserved_threads`, expanding the `-1` heuristic sentinel
    /// into a concrete count: a quarter of `max_threads`, at least one.
    pub fn resolved_reserved_threads(&self) -> u32 {
        if self.reserved_threads >= 0 {
            return self.reserved_threads as u32;
        }
        (self.max_threads / 4).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raising_min_above_max_raises_max() {
        let mut cfg = PoolConfig::default();
        cfg.set_max_threads(4).unwrap();
        cfg.set_min_threads(10);
        assert_eq!(cfg.max_threads(), 10);
    }

    #[test]
    fn max_below_min_rejected() {
        let mut cfg = PoolConfig::default();
        cfg.set_min_threads(10);
        assert!(cfg.set_max_threads(2).is_err());
    }

    #[test]
    fn shrink_count_zero_rejected() {
        let mut cfg = PoolConfig::default();
        assert!(cfg.set_max_shrink_count(0).is_err());
    }

    #[test]
    fn reserved_heuristic_resolves_to_quarter_of_max() {
        let mut cfg = PoolConfig::default();
        cfg.set_max_threads(200).unwrap();
        cfg.set_reserved_threads(RESERVED_HEURISTIC).unwrap();
        assert_eq!(cfg.resolved_reserved_threads(), 50);
    }

    #[test]
    fn reserved_heuristic_floors_at_one() {
        let mut cfg = PoolConfig::default();
        cfg.set_min_threads(1);
        cfg.set_max_threads(2).unwrap();
        cfg.set_reserved_threads(RESERVED_HEURISTIC).unwrap();
        assert_eq!(cfg.resolved_reserved_threads(), 1);
    }
}
