//! # Concurrency controller: in-flight accounting plus warmup.
//!
//! [`ConcurrencyController`] is the admission gate shared by every engine. It
//! counts in-flight work and computes the currently allowed concurrency from a
//! [`WarmupRamp`].
//!
//! ## Rules
//! - `in_flight <= allowed()` at all times (`try_acquire` is the only way in).
//! - `allowed()` never decreases over the controller's lifetime.
//! - The warmup clock starts at the first admission check, not at construction.
//! - A computed value is reused for [`WarmupRamp::refresh_interval`]; once the
//!   warmup elapsed the value is latched to `max` permanently (fast path).
//!
//! ## Wakeups
//! A backlog blocked only by the ramp must advance without a completion to
//! trigger it. Engines ask [`ConcurrencyController::next_wakeup`] and sleep until
//! that instant when capacity is ramp-limited.
//!
//! The controller is owned by exactly one controlling task and is not shared.

use std::sync::Arc;

use tokio::time::Instant;

use crate::core::clock::{Clock, TokioClock};
use crate::policies::WarmupRamp;

/// In-flight counter with a (possibly ramping) concurrency bound.
pub struct ConcurrencyController {
    ramp: WarmupRamp,
    clock: Arc<dyn Clock>,
    in_flight: u32,
    started_at: Option<Instant>,
    cached: u32,
    refresh_at: Option<Instant>,
    latched: bool,
    raised: Option<u32>,
}

impl ConcurrencyController {
    /// Creates a controller following `ramp`, measured with `clock`.
    pub fn new(ramp: WarmupRamp, clock: Arc<dyn Clock>) -> Self {
        let latched = ramp.is_disabled();
        Self {
            ramp,
            clock,
            in_flight: 0,
            started_at: None,
            cached: if latched { ramp.max() } else { 1 },
            refresh_at: None,
            latched,
            raised: None,
        }
    }

    /// Creates a controller with a constant bound of `max` (no warmup).
    pub fn fixed(max: u32) -> Self {
        Self::new(
            WarmupRamp::new(max, std::time::Duration::ZERO),
            Arc::new(TokioClock),
        )
    }

    /// Currently allowed concurrency, recomputed if the cached value expired.
    pub fn allowed(&mut self) -> u32 {
        if self.latched {
            return self.cached;
        }
        let now = self.clock.now();
        let started = *self.started_at.get_or_insert(now);
        if self.refresh_at.is_some_and(|at| now < at) {
            return self.cached;
        }

        let elapsed = now.saturating_duration_since(started);
        let next = self.ramp.allowed_at(elapsed).max(self.cached);
        if next > self.cached {
            self.raised = Some(next);
        }
        self.cached = next;

        if elapsed >= self.ramp.duration() {
            self.latched = true;
            self.refresh_at = None;
        } else {
            self.refresh_at = Some(now + self.ramp.refresh_interval());
        }
        self.cached
    }

    /// True iff a new job may start right now.
    #[inline]
    pub fn admit(&mut self) -> bool {
        self.in_flight < self.allowed()
    }

    /// Takes one slot if [`admit`](Self::admit) allows it.
    pub fn try_acquire(&mut self) -> bool {
        if self.admit() {
            self.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// Frees one slot.
    pub fn release(&mut self) {
        debug_assert!(self.in_flight > 0, "release without acquire");
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Number of jobs currently in flight.
    #[inline]
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Last computed allowed concurrency (no recomputation).
    #[inline]
    pub fn current(&self) -> u32 {
        self.cached
    }

    /// Configured maximum concurrency.
    #[inline]
    pub fn max(&self) -> u32 {
        self.ramp.max()
    }

    /// True when nothing is in flight.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    /// When capacity is limited by the ramp, the instant of the next recomputation.
    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.latched || self.in_flight < self.cached {
            return None;
        }
        self.refresh_at
    }

    /// Returns the new allowed concurrency once after each ramp step.
    pub fn take_raised(&mut self) -> Option<u32> {
        self.raised.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn ramping(max: u32, warmup: Duration) -> (ConcurrencyController, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let ctl = ConcurrencyController::new(WarmupRamp::new(max, warmup), clock.clone());
        (ctl, clock)
    }

    #[test]
    fn test_fixed_bound_is_enforced() {
        let mut ctl = ConcurrencyController::fixed(3);
        assert!(ctl.try_acquire());
        assert!(ctl.try_acquire());
        assert!(ctl.try_acquire());
        assert!(!ctl.try_acquire());
        assert_eq!(ctl.in_flight(), 3);

        ctl.release();
        assert!(ctl.admit());
        assert!(ctl.try_acquire());
        assert_eq!(ctl.next_wakeup(), None);
    }

    #[test]
    fn test_ramp_starts_at_one_and_latches() {
        let (mut ctl, clock) = ramping(8, Duration::from_secs(10));
        assert_eq!(ctl.allowed(), 1);
        assert!(ctl.try_acquire());
        assert!(!ctl.try_acquire());

        clock.advance(Duration::from_secs(5));
        assert_eq!(ctl.allowed(), 4);
        assert_eq!(ctl.take_raised(), Some(4));
        assert_eq!(ctl.take_raised(), None);

        clock.advance(Duration::from_secs(5));
        assert_eq!(ctl.allowed(), 8);
        assert_eq!(ctl.next_wakeup(), None);
    }

    #[test]
    fn test_cached_value_reused_within_refresh_interval() {
        let (mut ctl, clock) = ramping(8, Duration::from_millis(100));
        assert_eq!(ctl.allowed(), 1);

        // ramp alone would allow 4 here; the cache holds until 50ms
        clock.advance(Duration::from_millis(45));
        assert_eq!(ctl.allowed(), 1);

        clock.advance(Duration::from_millis(5));
        assert_eq!(ctl.allowed(), 4);
    }

    #[test]
    fn test_next_wakeup_only_when_ramp_limited() {
        let (mut ctl, clock) = ramping(4, Duration::from_secs(4));
        let start = clock.now();
        assert_eq!(ctl.next_wakeup(), None);
        assert!(ctl.try_acquire());
        assert_eq!(ctl.next_wakeup(), Some(start + Duration::from_secs(1)));

        ctl.release();
        assert_eq!(ctl.next_wakeup(), None);
    }

    #[test]
    fn test_allowed_is_monotonic_and_bounds_in_flight() {
        let (mut ctl, clock) = ramping(16, Duration::from_millis(640));
        let mut prev = 0;
        for _ in 0..100 {
            while ctl.try_acquire() {}
            let allowed = ctl.allowed();
            assert!(allowed >= prev);
            assert!(ctl.in_flight() <= allowed);
            assert_eq!(ctl.in_flight(), allowed);
            prev = allowed;
            ctl.release();
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(prev, 16);
    }
}
