//! # Events emitted by the engines.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Job events**: admission flow of one job/item (queued, started, completed, failed, ...)
//! - **Run events**: state of the whole run (ramp step, end requested, settled, completed, idle)
//! - **Worker events**: lifecycle of pool workers (spawned, exited)
//!
//! The [`Event`] struct carries additional metadata such as the engine name,
//! admission index, in-flight count and reasons.
//!
//! ## Ordering guarantees
//! Each event published on a [`Bus`](crate::Bus) gets a sequence number that
//! increases monotonically **per bus** (one bus per engine instance).
//!
//! ## Example
//! ```rust
//! use flowvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::JobFailed)
//!     .with_engine("ingest")
//!     .with_index(3)
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::JobFailed);
//! assert_eq!(ev.engine.as_deref(), Some("ingest"));
//! assert_eq!(ev.index, Some(3));
//! ```

use std::sync::Arc;
use std::time::SystemTime;

/// Classification of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Job events ===
    /// Job had to wait: no free capacity.
    ///
    /// Sets:
    /// - `index`: admission index
    /// - `in_flight`, `allowed`: controller state at push time
    JobQueued,

    /// Job or item started.
    ///
    /// Sets:
    /// - `index`: admission index
    /// - `in_flight`: count including this job
    /// - `allowed`: allowed concurrency at admission
    /// - `worker`: target worker (pool only)
    JobStarted,

    /// Job finished successfully.
    ///
    /// Sets:
    /// - `index`, `in_flight` (after release)
    JobCompleted,

    /// Job failed.
    ///
    /// Sets:
    /// - `index`, `in_flight` (after release)
    /// - `reason`: error message
    /// - `policy`: error policy label
    JobFailed,

    /// Job was never started or its result was discarded.
    ///
    /// Sets:
    /// - `index`
    /// - `reason`: why (e.g. "canceled", "settled", "closed", "consumer_gone")
    JobDropped,

    /// Mapper returned `Skip` or the predicate rejected the value.
    ///
    /// Sets:
    /// - `index`
    /// - `reason`: "skip" or "filtered"
    ItemSkipped,

    // === Run events ===
    /// Warmup raised the allowed concurrency.
    ///
    /// Sets:
    /// - `allowed`: new allowed concurrency
    ConcurrencyRaised,

    /// Mapper returned `End`; no further upstream items will be read.
    ///
    /// Sets:
    /// - `index`: item that requested the end
    EndRequested,

    /// Cancellation token observed; admission stopped.
    CancelObserved,

    /// Fail-fast run settled by its first failure.
    ///
    /// Sets:
    /// - `index`: failing job
    /// - `reason`: error message
    RunSettled,

    /// Queue became idle (empty backlog, nothing in flight).
    QueueIdle,

    /// Run finished; statistics were produced.
    ///
    /// Sets:
    /// - `reason`: summary (`ok`, counts)
    RunCompleted,

    // === Worker events ===
    /// Pool worker thread spawned.
    ///
    /// Sets:
    /// - `worker`: worker id
    WorkerSpawned,

    /// Pool worker acknowledged exit (or died).
    ///
    /// Sets:
    /// - `worker`: worker id
    /// - `reason`: set when the exit was not requested
    WorkerExited,

    /// Reply for an unknown request id arrived and was ignored.
    ///
    /// Sets:
    /// - `index`: stale request id
    /// - `worker`: sender
    StaleReply,
}

impl EventKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            EventKind::JobQueued => "job_queued",
            EventKind::JobStarted => "job_started",
            EventKind::JobCompleted => "job_completed",
            EventKind::JobFailed => "job_failed",
            EventKind::JobDropped => "job_dropped",
            EventKind::ItemSkipped => "item_skipped",
            EventKind::ConcurrencyRaised => "concurrency_raised",
            EventKind::EndRequested => "end_requested",
            EventKind::CancelObserved => "cancel_observed",
            EventKind::RunSettled => "run_settled",
            EventKind::QueueIdle => "queue_idle",
            EventKind::RunCompleted => "run_completed",
            EventKind::WorkerSpawned => "worker_spawned",
            EventKind::WorkerExited => "worker_exited",
            EventKind::StaleReply => "stale_reply",
        }
    }
}

/// Engine event with optional metadata.
///
/// - `seq`: monotonic per-bus sequence, stamped by [`Bus::publish`](crate::Bus::publish)
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Per-bus sequence number (0 until published).
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the emitting engine instance.
    pub engine: Option<Arc<str>>,
    /// Admission index of the job/item (request id in the pool).
    pub index: Option<u64>,
    /// In-flight count after the transition.
    pub in_flight: Option<u32>,
    /// Allowed concurrency at the transition.
    pub allowed: Option<u32>,
    /// Pool worker id.
    pub worker: Option<u32>,
    /// Error policy label.
    pub policy: Option<&'static str>,
    /// Human-readable reason (errors, drop causes, summaries).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: 0,
            at: SystemTime::now(),
            kind,
            engine: None,
            index: None,
            in_flight: None,
            allowed: None,
            worker: None,
            policy: None,
            reason: None,
        }
    }

    /// Attaches the engine name.
    #[inline]
    pub fn with_engine(mut self, engine: impl Into<Arc<str>>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    /// Attaches an admission index.
    #[inline]
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    /// Attaches the in-flight count.
    #[inline]
    pub fn with_in_flight(mut self, n: u32) -> Self {
        self.in_flight = Some(n);
        self
    }

    /// Attaches the allowed concurrency.
    #[inline]
    pub fn with_allowed(mut self, n: u32) -> Self {
        self.allowed = Some(n);
        self
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, worker: usize) -> Self {
        self.worker = Some(u32::try_from(worker).unwrap_or(u32::MAX));
        self
    }

    /// Attaches an error policy label.
    #[inline]
    pub fn with_policy(mut self, policy: &'static str) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True for failure-like events (`JobFailed`, `RunSettled`).
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self.kind, EventKind::JobFailed | EventKind::RunSettled)
    }
}
