//! # Error policies.
//!
//! [`ErrorPolicy`] decides what a failed job does to the run it belongs to.
//! Every engine looks the policy up in one table ([`Handling`]) instead of
//! branching on the variant in place, so all three behaviors go through the
//! same code path.
//!
//! | Policy      | settles run | collects | rejects caller | combined failure at flush |
//! |-------------|-------------|----------|----------------|---------------------------|
//! | `FailFast`  | yes         | no       | yes            | no                        |
//! | `Aggregate` | no          | yes      | yes            | yes                       |
//! | `Suppress`  | no          | no       | no             | no                        |

use crate::error::{Failure, RunError};

/// Policy controlling how job failures propagate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ErrorPolicy {
    /// Abort the run on the first failure (default).
    ///
    /// Use when:
    /// - Later jobs depend on earlier ones succeeding
    /// - Partial results are worthless
    #[default]
    FailFast,

    /// Keep going, collect every failure, surface one combined failure at the end.
    ///
    /// Use when:
    /// - Every item should get its chance
    /// - The caller wants the full list of what went wrong
    Aggregate,

    /// Log and count failures, never raise them.
    ///
    /// Use when:
    /// - Failures are expected and individually irrelevant
    /// - Example: best-effort cache warming
    Suppress,
}

/// What a failure does, per policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Handling {
    /// First failure becomes the terminal outcome; no further admission or emission.
    pub settle_run: bool,
    /// Failure is kept in [`RunStats::errors`](crate::RunStats::errors).
    pub collect: bool,
    /// The job's own caller observes the error (queue mode).
    pub reject_caller: bool,
    /// A combined [`RunError::Aggregate`] is raised once the run is flushed.
    pub surface_at_flush: bool,
}

const FAIL_FAST: Handling = Handling {
    settle_run: true,
    collect: false,
    reject_caller: true,
    surface_at_flush: false,
};

const AGGREGATE: Handling = Handling {
    settle_run: false,
    collect: true,
    reject_caller: true,
    surface_at_flush: true,
};

const SUPPRESS: Handling = Handling {
    settle_run: false,
    collect: false,
    reject_caller: false,
    surface_at_flush: false,
};

impl ErrorPolicy {
    /// Returns the handling table entry for this policy.
    #[inline]
    pub(crate) fn handling(self) -> Handling {
        match self {
            ErrorPolicy::FailFast => FAIL_FAST,
            ErrorPolicy::Aggregate => AGGREGATE,
            ErrorPolicy::Suppress => SUPPRESS,
        }
    }

    /// True if failures are collected into [`RunStats`](crate::RunStats).
    #[inline]
    pub fn collects_errors(self) -> bool {
        self.handling().collect
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            ErrorPolicy::FailFast => "fail_fast",
            ErrorPolicy::Aggregate => "aggregate",
            ErrorPolicy::Suppress => "suppress",
        }
    }

    /// Terminal outcome of a run that was not settled early.
    ///
    /// `collected` holds the failures recorded during the run (empty unless the
    /// policy collects).
    pub(crate) fn conclude(self, collected: &[Failure]) -> Result<(), RunError> {
        if self.handling().surface_at_flush && !collected.is_empty() {
            return Err(RunError::Aggregate {
                errors: collected.to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    #[test]
    fn test_default_is_fail_fast() {
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::FailFast);
    }

    #[test]
    fn test_only_aggregate_collects() {
        assert!(!ErrorPolicy::FailFast.collects_errors());
        assert!(ErrorPolicy::Aggregate.collects_errors());
        assert!(!ErrorPolicy::Suppress.collects_errors());
    }

    #[test]
    fn test_conclude() {
        let failures = vec![Failure::new(0, JobError::fail("x"))];
        assert!(ErrorPolicy::FailFast.conclude(&failures).is_ok());
        assert!(ErrorPolicy::Suppress.conclude(&failures).is_ok());
        assert!(ErrorPolicy::Aggregate.conclude(&[]).is_ok());
        assert_eq!(
            ErrorPolicy::Aggregate.conclude(&failures),
            Err(RunError::Aggregate { errors: failures })
        );
    }
}
