//! Error types used by the flowvisor engines and jobs.
//!
//! This module defines:
//!
//! - [`JobError`]: failure of one caller-supplied job, mapper or worker request.
//! - [`Failure`]: a [`JobError`] tagged with the admission index of its job.
//! - [`RunError`]: the terminal outcome of a whole run (fail-fast or combined).
//! - [`ConfigError`] / [`PoolError`]: construction errors.
//!
//! Job and run errors provide `as_label` for logs/metrics, like the events they travel with.

use std::fmt::Display;
use std::io;

use thiserror::Error;

/// # Errors produced by a single job.
///
/// Returned by caller-supplied code (or synthesized by the engine for panics,
/// cancellation and lost workers). Cloneable so the same failure can be handed
/// to the job's caller, recorded in [`RunStats`](crate::RunStats) and surfaced
/// in a combined [`RunError`].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Job execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Job panicked while being invoked or polled.
    #[error("job panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Job was never started (cancellation, closed queue, or a fail-fast run already settled).
    #[error("job canceled before start")]
    Canceled,

    /// The pool worker that owned the request is gone.
    #[error("worker {worker} is no longer available")]
    WorkerLost {
        /// Worker id (`index % pool_size`).
        worker: usize,
    },
}

impl JobError {
    /// Builds a [`JobError::Fail`] from anything displayable.
    ///
    /// # Example
    /// ```
    /// use flowvisor::JobError;
    ///
    /// let err = JobError::fail("connection refused");
    /// assert_eq!(err.to_string(), "execution failed: connection refused");
    /// ```
    pub fn fail(error: impl Display) -> Self {
        JobError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Fail { .. } => "job_failed",
            JobError::Panicked { .. } => "job_panicked",
            JobError::Canceled => "job_canceled",
            JobError::WorkerLost { .. } => "worker_lost",
        }
    }

    /// True for [`JobError::Canceled`]: the job never ran.
    pub fn is_canceled(&self) -> bool {
        matches!(self, JobError::Canceled)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Fail {
            error: format!("{err:#}"),
        }
    }
}

/// One failed job, identified by its admission index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job #{index}: {error}")]
pub struct Failure {
    /// 0-based admission index of the job or item.
    pub index: u64,
    /// What went wrong.
    #[source]
    pub error: JobError,
}

impl Failure {
    pub fn new(index: u64, error: JobError) -> Self {
        Self { index, error }
    }
}

/// # Terminal outcome of a run.
///
/// - `FailFast` runs end with [`RunError::Failed`] carrying the first failure.
/// - `Aggregate` runs end with [`RunError::Aggregate`] listing every failure in arrival order.
/// - `Suppress` runs never produce a `RunError`.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// First failure of a fail-fast run.
    #[error("run failed: {0}")]
    Failed(Failure),

    /// Every failure collected by an aggregating run.
    #[error("run failed with {} error(s): {}", .errors.len(), join(.errors))]
    Aggregate {
        /// Failures in arrival (completion) order.
        errors: Vec<Failure>,
    },

    /// The engine task stopped before the run completed (e.g. runtime shutdown).
    #[error("engine stopped before the run completed")]
    Terminated,
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Failed(_) => "run_failed",
            RunError::Aggregate { .. } => "run_aggregate_failed",
            RunError::Terminated => "run_terminated",
        }
    }

    /// All failures carried by this error, in arrival order.
    pub fn failures(&self) -> &[Failure] {
        match self {
            RunError::Failed(f) => std::slice::from_ref(f),
            RunError::Aggregate { errors } => errors,
            RunError::Terminated => &[],
        }
    }
}

fn join(errors: &[Failure]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invalid engine configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `concurrency` must be at least 1.
    #[error("concurrency must be positive")]
    ZeroConcurrency,

    /// `pool_size` must be at least 1.
    #[error("pool size must be positive")]
    ZeroPoolSize,
}

/// Error returned by [`WorkerPool::spawn`](crate::WorkerPool::spawn).
#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_message_lists_failures_in_order() {
        let err = RunError::Aggregate {
            errors: vec![
                Failure::new(1, JobError::fail("a")),
                Failure::new(3, JobError::fail("b")),
            ],
        };
        assert_eq!(
            err.to_string(),
            "run failed with 2 error(s): job #1: execution failed: a; job #3: execution failed: b"
        );
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.as_label(), "run_aggregate_failed");
    }

    #[test]
    fn anyhow_errors_become_failures() {
        let err: JobError = anyhow::anyhow!("disk full").context("writing batch").into();
        assert_eq!(
            err,
            JobError::Fail {
                error: "writing batch: disk full".into()
            }
        );
    }
}
