//! # Job queue mode.
//!
//! [`TaskQueue`] runs pushed jobs under a concurrency bound (optionally ramped
//! up by a warmup), keeps overflow in a FIFO backlog, and reports every job's
//! outcome through its [`JobHandle`].
//!
//! ## Failure handling per [`ErrorPolicy`](crate::ErrorPolicy)
//! | Policy      | caller's handle          | run (`drain`)                     |
//! |-------------|--------------------------|-----------------------------------|
//! | `FailFast`  | the job's error          | first failure; backlog rejected   |
//! | `Aggregate` | the job's error          | one combined failure at the end   |
//! | `Suppress`  | `JobOutcome::Suppressed` | `RunStats` (errors counted only)  |
//!
//! Jobs that were never started resolve to [`JobError::Canceled`](crate::JobError::Canceled).

mod actor;
mod builder;
mod handle;
mod task_queue;

pub use builder::QueueBuilder;
pub use handle::{JobHandle, JobOutcome};
pub use task_queue::TaskQueue;
