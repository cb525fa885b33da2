//! # LogWriter: events as `tracing` records.
//!
//! A subscriber that renders every [`Event`] as one structured `tracing` record.
//! Install any `tracing` subscriber (e.g. `tracing_subscriber::fmt`) to see them.
//!
//! ## Levels
//! | Level   | Events                                                        |
//! |---------|---------------------------------------------------------------|
//! | `debug` | queued, started, completed, skipped, stale replies            |
//! | `info`  | ramp steps, end requested, idle, run completed, worker lifecycle |
//! | `warn`  | failed jobs, dropped jobs, cancellation                       |
//! | `error` | fail-fast settlement                                          |
//!
//! ## Example output
//! ```text
//! DEBUG flowvisor: job_started engine="ingest" index=4 in_flight=3 allowed=4
//!  WARN flowvisor: job_failed engine="ingest" index=5 policy="aggregate" reason="execution failed: timeout"
//!  INFO flowvisor: run_completed engine="ingest" reason="ok=false in=10 out=9 errors=1 skipped=0 dropped=0"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

macro_rules! record {
    ($level:ident, $e:expr) => {
        tracing::$level!(
            target: "flowvisor",
            seq = $e.seq,
            engine = $e.engine.as_deref().unwrap_or("-"),
            index = $e.index,
            in_flight = $e.in_flight,
            allowed = $e.allowed,
            worker = $e.worker,
            policy = $e.policy,
            reason = $e.reason.as_deref(),
            "{}",
            $e.kind.as_label()
        )
    };
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::JobQueued
            | EventKind::JobStarted
            | EventKind::JobCompleted
            | EventKind::ItemSkipped
            | EventKind::StaleReply => record!(debug, e),

            EventKind::ConcurrencyRaised
            | EventKind::EndRequested
            | EventKind::QueueIdle
            | EventKind::RunCompleted
            | EventKind::WorkerSpawned
            | EventKind::WorkerExited => record!(info, e),

            EventKind::JobFailed | EventKind::JobDropped | EventKind::CancelObserved => {
                record!(warn, e)
            }

            EventKind::RunSettled => record!(error, e),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
