//! # Engine configuration.
//!
//! Provides [`Config`] for [`TaskQueue`](crate::TaskQueue) and
//! [`StreamStage`](crate::StreamStage), and [`PoolConfig`] for
//! [`WorkerPool`](crate::WorkerPool).
//!
//! ## Sentinel values
//! - `warmup = 0s` → no warmup ramp (full concurrency from the first job)
//! - `bus_capacity = 0` → clamped to 1
//!
//! Callbacks (`on_done`, `on_idle`) and predicates are not configuration data;
//! they are set on the engine builders.

use std::borrow::Cow;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::{ErrorPolicy, ResolveOn, WarmupRamp};

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Configuration shared by the queue and the stream stage.
///
/// ## Field semantics
/// - `name`: label attached to every event of the engine instance
/// - `concurrency`: upper bound on in-flight jobs (must be `> 0`)
/// - `warmup`: ramp duration from 1 to `concurrency` (`0s` = disabled)
/// - `error_policy`: what a failure does to the run
/// - `resolve_on`: queue only; when `JobHandle`s settle
/// - `bus_capacity`: event bus ring buffer size (min 1)
///
/// # Example
/// ```rust
/// use flowvisor::{Config, ErrorPolicy};
///
/// let cfg = Config::new(8)
///     .with_warmup_secs(2.5)
///     .with_error_policy(ErrorPolicy::Aggregate);
/// assert!(cfg.warmup_enabled());
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Instance name used in events and logs.
    pub name: Cow<'static, str>,

    /// Maximum number of jobs in flight at once.
    pub concurrency: usize,

    /// Warmup ramp duration.
    ///
    /// - `Duration::ZERO` = disabled
    /// - `> 0` = allowed concurrency grows linearly from 1 to `concurrency`
    pub warmup: Duration,

    /// Failure propagation policy.
    pub error_policy: ErrorPolicy,

    /// Settlement point for queue handles (ignored by stages).
    pub resolve_on: ResolveOn,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl Config {
    /// Creates a configuration with the given concurrency and defaults for the rest.
    pub fn new(concurrency: usize) -> Self {
        Self {
            name: Cow::Borrowed("flowvisor"),
            concurrency,
            warmup: Duration::ZERO,
            error_policy: ErrorPolicy::default(),
            resolve_on: ResolveOn::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }

    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Sets the warmup in (fractional) seconds; negative or non-finite values disable it.
    pub fn with_warmup_secs(mut self, secs: f64) -> Self {
        self.warmup = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_resolve_on(mut self, resolve_on: ResolveOn) -> Self {
        self.resolve_on = resolve_on;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Returns `true` if a warmup ramp applies.
    #[inline]
    pub fn warmup_enabled(&self) -> bool {
        !self.ramp().is_disabled()
    }

    /// Concurrency as the controller's counter type (saturating).
    #[inline]
    pub fn max_concurrency(&self) -> u32 {
        u32::try_from(self.concurrency).unwrap_or(u32::MAX)
    }

    /// Warmup ramp derived from `concurrency` and `warmup`.
    #[inline]
    pub fn ramp(&self) -> WarmupRamp {
        WarmupRamp::new(self.max_concurrency(), self.warmup)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Configuration for [`WorkerPool`](crate::WorkerPool).
///
/// There is no warmup and no error policy: concurrency is bounded by
/// `pool_size` and failures are always suppressed (logged and counted).
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Instance name; worker threads are named `{name}-worker-{id}`.
    pub name: Cow<'static, str>,

    /// Number of worker threads, spawned up front.
    pub pool_size: usize,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl PoolConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            name: Cow::Borrowed("pool"),
            pool_size,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }

    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        Ok(())
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_is_rejected() {
        assert_eq!(Config::new(0).validate(), Err(ConfigError::ZeroConcurrency));
        assert_eq!(
            PoolConfig::new(0).validate(),
            Err(ConfigError::ZeroPoolSize)
        );
    }

    #[test]
    fn warmup_secs_sentinels() {
        assert!(!Config::new(4).warmup_enabled());
        assert!(!Config::new(4).with_warmup_secs(-1.0).warmup_enabled());
        assert!(!Config::new(4).with_warmup_secs(f64::NAN).warmup_enabled());
        assert!(!Config::new(1).with_warmup_secs(5.0).warmup_enabled());
        assert_eq!(
            Config::new(4).with_warmup_secs(0.25).warmup,
            Duration::from_millis(250)
        );
    }
}
