//! # Run statistics.
//!
//! [`RunStats`] is produced exactly once per run, when the run completes, and is
//! handed to the `on_done` callback and returned from drain points.
//!
//! ## Accounting identity
//! ```text
//! count_in == count_out + count_errors + count_skipped + count_dropped
//! ```
//! - `count_skipped`: `Skip`/`End` sentinels and predicate rejections
//! - `count_dropped`: work never started (cancellation, settled run, closed queue)
//!   and results produced but not delivered (settled run, consumer gone)

use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use crate::error::Failure;

/// Immutable summary of a finished run.
#[derive(Clone, Debug)]
pub struct RunStats {
    /// True when no job failed and no upstream error arrived.
    pub ok: bool,
    /// Jobs pushed / items admitted from upstream.
    pub count_in: u64,
    /// Results delivered.
    pub count_out: u64,
    /// Failed jobs (every policy).
    pub count_errors: u64,
    /// Sentinels and predicate rejections.
    pub count_skipped: u64,
    /// Never started or not delivered.
    pub count_dropped: u64,
    /// Collected failures in arrival order (only under `ErrorPolicy::Aggregate`).
    pub errors: Vec<Failure>,
    /// Wall-clock start of the run.
    pub started_at: SystemTime,
    /// Run duration.
    pub elapsed: Duration,
}

impl RunStats {
    /// True if the accounting identity holds.
    pub fn is_balanced(&self) -> bool {
        self.count_in == self.count_out + self.count_errors + self.count_skipped + self.count_dropped
    }

    /// One-line summary used in `RunCompleted` events.
    pub fn summary(&self) -> String {
        format!(
            "ok={} in={} out={} errors={} skipped={} dropped={}",
            self.ok,
            self.count_in,
            self.count_out,
            self.count_errors,
            self.count_skipped,
            self.count_dropped
        )
    }
}

/// Mutable accumulator owned by the controlling task.
pub(crate) struct StatsRecorder {
    count_in: u64,
    count_out: u64,
    count_errors: u64,
    count_skipped: u64,
    count_dropped: u64,
    errors: Vec<Failure>,
    collect: bool,
    upstream_failed: bool,
    started_at: SystemTime,
    started: Instant,
}

impl StatsRecorder {
    pub fn new(collect: bool) -> Self {
        Self {
            count_in: 0,
            count_out: 0,
            count_errors: 0,
            count_skipped: 0,
            count_dropped: 0,
            errors: Vec::new(),
            collect,
            upstream_failed: false,
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    pub fn record_in(&mut self) {
        self.count_in += 1;
    }

    pub fn record_out(&mut self) {
        self.count_out += 1;
    }

    pub fn record_skipped(&mut self) {
        self.count_skipped += 1;
    }

    pub fn record_dropped(&mut self, n: u64) {
        self.count_dropped += n;
    }

    pub fn record_error(&mut self, failure: &Failure) {
        self.count_errors += 1;
        if self.collect {
            self.errors.push(failure.clone());
        }
    }

    pub fn record_upstream_failure(&mut self) {
        self.upstream_failed = true;
    }

    pub fn errors(&self) -> &[Failure] {
        &self.errors
    }

    /// Builds the final [`RunStats`].
    pub fn finish(&self) -> RunStats {
        RunStats {
            ok: self.count_errors == 0 && !self.upstream_failed,
            count_in: self.count_in,
            count_out: self.count_out,
            count_errors: self.count_errors,
            count_skipped: self.count_skipped,
            count_dropped: self.count_dropped,
            errors: self.errors.clone(),
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    #[tokio::test]
    async fn errors_collected_only_when_asked() {
        let failure = Failure::new(2, JobError::fail("x"));

        let mut collecting = StatsRecorder::new(true);
        let mut counting = StatsRecorder::new(false);
        for rec in [&mut collecting, &mut counting] {
            rec.record_in();
            rec.record_in();
            rec.record_out();
            rec.record_error(&failure);
        }

        let a = collecting.finish();
        let b = counting.finish();
        assert_eq!(a.errors, vec![failure]);
        assert!(b.errors.is_empty());
        for stats in [a, b] {
            assert!(!stats.ok);
            assert_eq!(stats.count_errors, 1);
            assert!(stats.is_balanced());
        }
    }
}
