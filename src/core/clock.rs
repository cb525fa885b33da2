//! Time source for the warmup ramp.

use tokio::time::Instant;

/// Monotonic clock consulted by the [`ConcurrencyController`](crate::ConcurrencyController).
///
/// Wakeups for ramp steps are always scheduled on tokio's timer; a custom clock
/// only changes how elapsed warmup time is measured.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Default clock: `tokio::time::Instant::now()`.
///
/// Honours tokio's paused/advanced test time.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
