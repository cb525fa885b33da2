//! # TaskQueue: bounded-concurrency job queue.
//!
//! A cloneable handle over one [`QueueActor`](super::actor) task.
//!
//! ## Flow
//! ```text
//! push(job) ──► Command::Push ──► actor
//!                                  ├─ admit → start now       (JobStarted)
//!                                  └─ full  → backlog (FIFO)  (JobQueued)
//!            ◄── JobHandle settles on start or finish (ResolveOn)
//!
//! on_idle() ──► settles once backlog is empty and nothing is in flight
//! drain()   ──► stops intake, waits for idle, returns RunStats or the run error
//! ```

use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::RunStats;
use crate::error::{ConfigError, JobError, RunError};
use crate::events::{Bus, Event};

use super::actor::{BoxJob, Command, Outcome};
use super::builder::QueueBuilder;
use super::handle::JobHandle;

/// Handle to a bounded-concurrency job queue.
///
/// Clones share the same queue. The queue's run completes when
/// [`drain`](TaskQueue::drain) is called (or every handle is dropped) and no
/// work remains.
///
/// # Example
/// ```rust
/// use flowvisor::{Config, JobOutcome, TaskQueue};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let queue = TaskQueue::<u32>::new(Config::new(4))?;
/// let handle = queue.push(|| async { Ok(21 * 2) });
///
/// assert_eq!(handle.await?, JobOutcome::Completed(42));
/// let stats = queue.drain().await?;
/// assert_eq!(stats.count_out, 1);
/// # Ok(())
/// # }
/// ```
pub struct TaskQueue<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    bus: Bus,
    token: CancellationToken,
    outcome: Arc<OnceLock<Outcome>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            bus: self.bus.clone(),
            token: self.token.clone(),
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Creates a queue with default options. Must be called within a tokio runtime.
    pub fn new(cfg: Config) -> Result<Self, ConfigError> {
        Self::builder(cfg).build()
    }

    /// Returns a builder for callbacks, cancellation, subscribers and clock.
    pub fn builder(cfg: Config) -> QueueBuilder<T> {
        QueueBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        tx: mpsc::UnboundedSender<Command<T>>,
        bus: Bus,
        token: CancellationToken,
        outcome: Arc<OnceLock<Outcome>>,
    ) -> Self {
        Self {
            tx,
            bus,
            token,
            outcome,
        }
    }

    /// Submits a job. Never fails synchronously.
    ///
    /// The job starts immediately if capacity allows, otherwise it waits in
    /// FIFO order. The returned [`JobHandle`] settles according to the
    /// configured [`ResolveOn`](crate::ResolveOn) and [`ErrorPolicy`](crate::ErrorPolicy).
    /// Panics raised by `job` (when invoked or polled) become [`JobError::Panicked`].
    pub fn push<F, Fut>(&self, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: BoxJob<T> = Box::new(move || job().boxed());
        // A closed actor drops the reply; the handle then resolves to `Canceled`.
        let _ = self.tx.send(Command::Push { job, reply });
        JobHandle::new(rx)
    }

    /// Settles the next time the queue is idle (immediately if it already is).
    ///
    /// The position relative to other pushes is fixed when this is called.
    pub fn on_idle(&self) -> impl Future<Output = ()> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::OnIdle { reply });
        async move {
            let _ = rx.await;
        }
    }

    /// Stops intake, waits until every admitted job finished, and returns the run outcome.
    ///
    /// - `FailFast`: the first failure, if any
    /// - `Aggregate`: one combined failure listing every failed job
    /// - otherwise the final [`RunStats`]
    ///
    /// Draining twice (from clones) yields the same outcome.
    pub async fn drain(self) -> Result<RunStats, RunError> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Drain { reply }).is_ok() {
            if let Ok(outcome) = rx.await {
                return outcome;
            }
        }
        self.outcome.get().cloned().unwrap_or(Err(RunError::Terminated))
    }

    /// Trips the queue's cancellation token: queued and later jobs are rejected.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The queue's cancellation token (shareable with other engines).
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// True once the queue's run completed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Receiver for this queue's events, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }
}
