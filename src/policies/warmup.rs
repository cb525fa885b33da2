//! # Warmup ramp for allowed concurrency.
//!
//! [`WarmupRamp`] raises the allowed concurrency linearly from 1 to `max` over a
//! configured duration, so cold downstream dependencies (fresh connection pools,
//! rate-limited APIs) are not hit by `max` requests at once.
//!
//! ```text
//! allowed
//!   max ┤                 ┌──────────── latched
//!       │             ┌───┘
//!       │         ┌───┘
//!     1 ┼─────────┘
//!       └──────────────────┬──────────► elapsed
//!                       duration
//! ```
//!
//! ## Rules
//! - `duration == 0` or `max <= 1` disables the ramp (always `max`).
//! - `allowed_at` is monotonic non-decreasing in `elapsed`.
//! - From `elapsed >= duration` on, the result is `max`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use flowvisor::WarmupRamp;
//!
//! let ramp = WarmupRamp::new(8, Duration::from_secs(10));
//! assert_eq!(ramp.allowed_at(Duration::ZERO), 1);
//! assert_eq!(ramp.allowed_at(Duration::from_secs(5)), 4);
//! assert_eq!(ramp.allowed_at(Duration::from_secs(10)), 8);
//! ```

use std::time::Duration;

/// Longest time a computed ramp value may be reused.
const MAX_REFRESH: Duration = Duration::from_secs(1);
const MIN_REFRESH: Duration = Duration::from_millis(1);

/// Linear ramp from 1 to `max` over `duration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WarmupRamp {
    max: u32,
    duration: Duration,
}

impl WarmupRamp {
    /// Creates a ramp towards `max` (clamped to at least 1).
    pub fn new(max: u32, duration: Duration) -> Self {
        Self {
            max: max.max(1),
            duration,
        }
    }

    /// Target concurrency.
    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Ramp duration.
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True when the ramp is a no-op and `max` applies from the start.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.duration.is_zero() || self.max <= 1
    }

    /// Allowed concurrency `elapsed` after the warmup started.
    pub fn allowed_at(&self, elapsed: Duration) -> u32 {
        if self.is_disabled() || elapsed >= self.duration {
            return self.max;
        }
        let progress = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let step = (1.0 + f64::from(self.max - 1) * progress).floor();
        (step as u32).clamp(1, self.max)
    }

    /// How long a computed value may be cached: `duration / 2`, capped at one second.
    ///
    /// Caching is safe because the ramp never decreases: a stale value only
    /// under-admits.
    pub fn refresh_interval(&self) -> Duration {
        (self.duration / 2).clamp(MIN_REFRESH, MAX_REFRESH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_ramp_returns_max() {
        let no_duration = WarmupRamp::new(8, Duration::ZERO);
        assert!(no_duration.is_disabled());
        assert_eq!(no_duration.allowed_at(Duration::ZERO), 8);

        let single = WarmupRamp::new(1, Duration::from_secs(10));
        assert!(single.is_disabled());
        assert_eq!(single.allowed_at(Duration::ZERO), 1);
    }

    #[test]
    fn test_linear_points() {
        let ramp = WarmupRamp::new(11, Duration::from_secs(10));
        assert_eq!(ramp.allowed_at(Duration::ZERO), 1);
        assert_eq!(ramp.allowed_at(Duration::from_millis(999)), 1);
        assert_eq!(ramp.allowed_at(Duration::from_secs(1)), 2);
        assert_eq!(ramp.allowed_at(Duration::from_secs(5)), 6);
        assert_eq!(ramp.allowed_at(Duration::from_millis(9_999)), 10);
        assert_eq!(ramp.allowed_at(Duration::from_secs(10)), 11);
        assert_eq!(ramp.allowed_at(Duration::from_secs(3600)), 11);
    }

    #[test]
    fn test_monotonic_non_decreasing() {
        let ramp = WarmupRamp::new(64, Duration::from_millis(750));
        let mut prev = 0;
        for ms in 0..1_000 {
            let now = ramp.allowed_at(Duration::from_millis(ms));
            assert!(now >= prev, "ramp went down at {ms}ms: {prev} -> {now}");
            assert!((1..=64).contains(&now));
            prev = now;
        }
        assert_eq!(prev, 64);
    }

    #[test]
    fn test_refresh_interval_bounds() {
        assert_eq!(
            WarmupRamp::new(8, Duration::from_millis(100)).refresh_interval(),
            Duration::from_millis(50)
        );
        assert_eq!(
            WarmupRamp::new(8, Duration::from_secs(60)).refresh_interval(),
            Duration::from_secs(1)
        );
        assert_eq!(
            WarmupRamp::new(8, Duration::from_micros(10)).refresh_interval(),
            Duration::from_millis(1)
        );
    }
}
