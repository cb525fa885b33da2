//! Admission and failure policies.
//!
//! This module groups the knobs that control **how fast** work is admitted and
//! **what happens** when it fails.
//!
//! ## Contents
//! - [`WarmupRamp`] linear concurrency ramp from 1 to the configured maximum
//! - [`ErrorPolicy`] fail-fast / aggregate / suppress
//! - [`ResolveOn`] when a queued job's handle settles
//!
//! ## Quick wiring
//! ```text
//! Config { concurrency, warmup, error_policy, resolve_on }
//!      └─► core::ConcurrencyController uses WarmupRamp to bound in-flight work
//!      └─► TaskQueue / StreamStage use ErrorPolicy::handling() on every failure
//!      └─► TaskQueue uses ResolveOn to settle JobHandles
//! ```
//!
//! ## Defaults
//! - warmup disabled (`Duration::ZERO`)
//! - `ErrorPolicy::FailFast`
//! - `ResolveOn::Finish`

mod error;
mod resolve;
mod warmup;

pub use error::ErrorPolicy;
pub use resolve::ResolveOn;
pub use warmup::WarmupRamp;
