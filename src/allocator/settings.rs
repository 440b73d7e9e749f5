//! Allocator tuning knobs.

use std::time::Duration;

use crate::config::Config;

/// Lower bound of the physical update interval.
pub const MIN_UPDATE_PHYSICAL_INTERVAL: Duration = Duration::from_millis(1);
/// Upper bound of the physical update interval.
pub const MAX_UPDATE_PHYSICAL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_UPDATE_PHYSICAL_INTERVAL: Duration = Duration::from_millis(50);
/// Default checkpoint cadence, also the persist-ahead margin.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(3);
/// Shortest usable save interval; the watermark has millisecond resolution.
pub const MIN_SAVE_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_MAX_RESET_TS_GAP: Duration = Duration::from_secs(24 * 60 * 60);

/// A checkpoint is persisted once the next physical value comes within
/// this many milliseconds of the watermark.
pub const UPDATE_TIMESTAMP_GUARD_MS: i64 = 1;

/// Largest block a single allocation may reserve.
pub const MAX_ALLOCATE_COUNT: u32 = 4096;

/// A tick that finds the wall clock this many update intervals ahead of
/// the cursor logs a clock offset warning.
pub const JET_LAG_WARNING_FACTOR: u32 = 3;

/// Clamp an update interval into [1ms, 10s].
pub fn clamp_update_physical_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_UPDATE_PHYSICAL_INTERVAL, MAX_UPDATE_PHYSICAL_INTERVAL)
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(20))
    }
}

/// Settings shared by every engine of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorSettings {
    /// Tick period, always within [1ms, 10s].
    pub update_physical_interval: Duration,
    /// How far ahead of the cursor checkpoints are persisted. At least 1ms.
    pub save_interval: Duration,
    /// Bound on catch-up waits and on forward resets.
    pub max_reset_ts_gap: Duration,
    pub save_retry: RetryPolicy,
}

impl AllocatorSettings {
    pub fn new(
        update_physical_interval: Duration,
        save_interval: Duration,
        max_reset_ts_gap: Duration,
        save_retry: RetryPolicy,
    ) -> Self {
        Self {
            update_physical_interval: clamp_update_physical_interval(update_physical_interval),
            save_interval: save_interval.max(MIN_SAVE_INTERVAL),
            max_reset_ts_gap,
            save_retry,
        }
    }

    /// Create settings from application config values.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tso_update_physical_interval,
            config.tso_save_interval,
            config.max_gap_reset_ts,
            RetryPolicy::new(config.tso_save_retry_attempts, config.tso_save_retry_backoff),
        )
    }

    pub fn save_interval_ms(&self) -> i64 {
        i64::try_from(self.save_interval.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn update_interval_ms(&self) -> i64 {
        self.update_physical_interval.as_millis() as i64
    }
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_UPDATE_PHYSICAL_INTERVAL,
            DEFAULT_SAVE_INTERVAL,
            DEFAULT_MAX_RESET_TS_GAP,
            RetryPolicy::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_update_interval() {
        assert_eq!(
            clamp_update_physical_interval(Duration::from_micros(500)),
            Duration::from_millis(1)
        );
        assert_eq!(
            clamp_update_physical_interval(Duration::from_secs(20)),
            Duration::from_secs(10)
        );
        assert_eq!(
            clamp_update_physical_interval(Duration::from_millis(50)),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_settings_clamp_on_construction() {
        let settings = AllocatorSettings::new(
            Duration::ZERO,
            DEFAULT_SAVE_INTERVAL,
            DEFAULT_MAX_RESET_TS_GAP,
            RetryPolicy::default(),
        );
        assert_eq!(settings.update_physical_interval, MIN_UPDATE_PHYSICAL_INTERVAL);
    }

    #[test]
    fn test_sub_millisecond_save_interval_rounds_up() {
        let settings = AllocatorSettings::new(
            DEFAULT_UPDATE_PHYSICAL_INTERVAL,
            Duration::from_micros(500),
            DEFAULT_MAX_RESET_TS_GAP,
            RetryPolicy::default(),
        );
        assert_eq!(settings.save_interval, MIN_SAVE_INTERVAL);
        assert_eq!(settings.save_interval_ms(), 1);
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(20));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }
}
