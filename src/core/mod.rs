//! Engine core: admission gate, clock and run statistics.
//!
//! Shared by every engine:
//! - [`controller`]: in-flight accounting and warmup-aware admission;
//! - [`clock`]: time source for the warmup ramp;
//! - [`stats`]: per-run counters and the final [`RunStats`].

pub mod clock;
pub mod controller;
pub mod stats;

pub use clock::{Clock, TokioClock};
pub use controller::ConcurrencyController;
pub use stats::RunStats;
pub(crate) use stats::StatsRecorder;
