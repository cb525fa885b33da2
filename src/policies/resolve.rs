//! # When a queued job's handle settles.
//!
//! - [`ResolveOn::Finish`]: the [`JobHandle`](crate::JobHandle) settles with the job's result (default).
//! - [`ResolveOn::Start`]: the handle settles as soon as the job is admitted,
//!   with [`JobOutcome::Started`](crate::JobOutcome::Started). The job still runs
//!   to completion and still counts towards the run's statistics and error policy.

/// Settlement point for [`TaskQueue`](crate::TaskQueue) handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolveOn {
    /// Settle when the job starts.
    Start,
    /// Settle when the job finishes (default).
    #[default]
    Finish,
}
