//! # QueueActor: the task that owns a queue's state.
//!
//! Every [`TaskQueue`](crate::TaskQueue) clone talks to one actor over an
//! unbounded command channel. The actor owns the controller, the backlog, the
//! statistics and every job future (polled through `FuturesUnordered`), so
//! there is exactly one controlling tick and no locks.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► finished? ((intake closed || drain requested) && idle) → break
//!   └─► select (biased):
//!        ├─ job finished      → release slot, resolve caller, apply ErrorPolicy, pump backlog
//!        ├─ token cancelled   → reject backlog, reject later pushes
//!        ├─ command           → Push / OnIdle / Drain
//!        └─ ramp wakeup       → pump backlog (only while ramp-limited)
//!   then: idle check (absorbs commands already sent by finishing jobs first)
//! }
//! finish: RunStats → RunCompleted → on_done → answer drain waiters
//! ```

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::core::{ConcurrencyController, RunStats, StatsRecorder};
use crate::error::{Failure, JobError, RunError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::{ErrorPolicy, ResolveOn};
use crate::subscribers::panic_message;

use super::handle::JobOutcome;

pub(crate) type BoxJob<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, JobError>> + Send>;
pub(crate) type Reply<T> = oneshot::Sender<Result<JobOutcome<T>, JobError>>;
pub(crate) type Outcome = Result<RunStats, RunError>;
pub(crate) type IdleCallback = Box<dyn FnMut() + Send>;
pub(crate) type DoneCallback = Box<dyn FnOnce(&RunStats) + Send>;

/// Messages from queue handles to the actor.
pub(crate) enum Command<T> {
    Push { job: BoxJob<T>, reply: Reply<T> },
    OnIdle { reply: oneshot::Sender<()> },
    Drain { reply: oneshot::Sender<Outcome> },
}

/// A job waiting for capacity.
struct Queued<T> {
    index: u64,
    job: BoxJob<T>,
    reply: Reply<T>,
}

/// A job that finished (successfully, with an error, or by panicking).
struct Finished<T> {
    index: u64,
    result: Result<T, JobError>,
    reply: Option<Reply<T>>,
}

type Running<T> = FuturesUnordered<BoxFuture<'static, Finished<T>>>;

pub(crate) struct QueueActor<T> {
    name: Arc<str>,
    policy: ErrorPolicy,
    resolve_on: ResolveOn,
    ctl: ConcurrencyController,
    bus: Bus,
    stats: StatsRecorder,
    on_idle: Option<IdleCallback>,
    on_done: Option<DoneCallback>,
    outcome: Arc<OnceLock<Outcome>>,
    backlog: VecDeque<Queued<T>>,
    next_index: u64,
    idle_waiters: Vec<oneshot::Sender<()>>,
    drain_waiters: Vec<oneshot::Sender<Outcome>>,
    settled: Option<Failure>,
    canceled: bool,
    draining: bool,
    was_idle: bool,
}

impl<T: Send + 'static> QueueActor<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Arc<str>,
        policy: ErrorPolicy,
        resolve_on: ResolveOn,
        ctl: ConcurrencyController,
        bus: Bus,
        on_idle: Option<IdleCallback>,
        on_done: Option<DoneCallback>,
        outcome: Arc<OnceLock<Outcome>>,
    ) -> Self {
        Self {
            name,
            policy,
            resolve_on,
            ctl,
            bus,
            stats: StatsRecorder::new(policy.collects_errors()),
            on_idle,
            on_done,
            outcome,
            backlog: VecDeque::new(),
            next_index: 0,
            idle_waiters: Vec::new(),
            drain_waiters: Vec::new(),
            settled: None,
            canceled: false,
            draining: false,
            was_idle: true,
        }
    }

    /// Runs until intake is closed (or a drain was requested) and the queue is idle.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<T>>, token: CancellationToken) {
        let mut running: Running<T> = FuturesUnordered::new();
        let mut intake_open = true;

        loop {
            if (self.draining || !intake_open) && self.is_idle() {
                break;
            }
            let wake = if self.backlog.is_empty() {
                None
            } else {
                self.ctl.next_wakeup()
            };

            tokio::select! {
                biased;

                Some(done) = running.next(), if !running.is_empty() => {
                    self.on_finished(done, &mut running);
                }
                _ = token.cancelled(), if !self.canceled => {
                    self.on_cancel();
                }
                cmd = rx.recv(), if intake_open => match cmd {
                    Some(cmd) => self.on_command(cmd, &mut running),
                    None => intake_open = false,
                },
                _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                    self.pump(&mut running);
                }
            }

            self.check_idle(&mut rx, &mut running);
        }

        // Late commands see a closed queue.
        self.draining = true;
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            self.on_command(cmd, &mut running);
        }
        self.finish();
    }

    fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.ctl.is_idle()
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_engine(Arc::clone(&self.name))
    }

    fn rejection(&self) -> Option<&'static str> {
        if self.settled.is_some() {
            Some("settled")
        } else if self.canceled {
            Some("canceled")
        } else if self.draining {
            Some("closed")
        } else {
            None
        }
    }

    fn on_command(&mut self, cmd: Command<T>, running: &mut Running<T>) {
        match cmd {
            Command::Push { job, reply } => self.on_push(job, reply, running),
            Command::OnIdle { reply } => {
                if self.is_idle() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::Drain { reply } => {
                self.draining = true;
                self.drain_waiters.push(reply);
            }
        }
    }

    fn on_push(&mut self, job: BoxJob<T>, reply: Reply<T>, running: &mut Running<T>) {
        let index = self.next_index;
        self.next_index += 1;
        self.stats.record_in();

        if let Some(reason) = self.rejection() {
            self.stats.record_dropped(1);
            self.bus
                .publish(self.event(EventKind::JobDropped).with_index(index).with_reason(reason));
            let _ = reply.send(Err(JobError::Canceled));
            return;
        }

        let queued = Queued { index, job, reply };
        if self.backlog.is_empty() && self.ctl.try_acquire() {
            self.start(queued, running);
        } else {
            self.bus.publish(
                self.event(EventKind::JobQueued)
                    .with_index(index)
                    .with_in_flight(self.ctl.in_flight())
                    .with_allowed(self.ctl.current()),
            );
            self.backlog.push_back(queued);
        }
        self.note_ramp();
    }

    /// Starts backlog entries while capacity remains.
    fn pump(&mut self, running: &mut Running<T>) {
        while !self.backlog.is_empty() && self.ctl.try_acquire() {
            if let Some(queued) = self.backlog.pop_front() {
                self.start(queued, running);
            }
        }
        self.note_ramp();
    }

    fn note_ramp(&mut self) {
        if let Some(allowed) = self.ctl.take_raised() {
            self.bus
                .publish(self.event(EventKind::ConcurrencyRaised).with_allowed(allowed));
        }
    }

    /// Launches a job whose slot was already acquired.
    fn start(&mut self, queued: Queued<T>, running: &mut Running<T>) {
        let Queued { index, job, reply } = queued;
        self.bus.publish(
            self.event(EventKind::JobStarted)
                .with_index(index)
                .with_in_flight(self.ctl.in_flight())
                .with_allowed(self.ctl.current()),
        );

        let reply = match self.resolve_on {
            ResolveOn::Start => {
                let _ = reply.send(Ok(JobOutcome::Started));
                None
            }
            ResolveOn::Finish => Some(reply),
        };

        running.push(
            async move {
                // The closure runs inside the guarded future, so a panic while
                // building the job is caught like one while polling it.
                let result = match AssertUnwindSafe(async move { job().await })
                    .catch_unwind()
                    .await
                {
                    Ok(res) => res,
                    Err(panic) => Err(JobError::Panicked {
                        info: panic_message(&*panic),
                    }),
                };
                Finished {
                    index,
                    result,
                    reply,
                }
            }
            .boxed(),
        );
    }

    fn on_finished(&mut self, done: Finished<T>, running: &mut Running<T>) {
        let Finished {
            index,
            result,
            reply,
        } = done;
        self.ctl.release();

        match result {
            Ok(value) => {
                self.stats.record_out();
                self.bus.publish(
                    self.event(EventKind::JobCompleted)
                        .with_index(index)
                        .with_in_flight(self.ctl.in_flight()),
                );
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(JobOutcome::Completed(value)));
                }
            }
            Err(error) => self.on_failed(Failure::new(index, error), reply),
        }
        self.pump(running);
    }

    fn on_failed(&mut self, failure: Failure, reply: Option<Reply<T>>) {
        let handling = self.policy.handling();
        self.stats.record_error(&failure);
        self.bus.publish(
            self.event(EventKind::JobFailed)
                .with_index(failure.index)
                .with_in_flight(self.ctl.in_flight())
                .with_policy(self.policy.as_label())
                .with_reason(failure.error.to_string()),
        );

        if let Some(reply) = reply {
            let answer = if handling.reject_caller {
                Err(failure.error.clone())
            } else {
                Ok(JobOutcome::Suppressed)
            };
            let _ = reply.send(answer);
        }

        if handling.settle_run && self.settled.is_none() {
            self.bus.publish(
                self.event(EventKind::RunSettled)
                    .with_index(failure.index)
                    .with_reason(failure.error.to_string()),
            );
            self.settled = Some(failure);
            self.reject_backlog("settled");
        }
    }

    fn on_cancel(&mut self) {
        self.canceled = true;
        self.bus.publish(
            self.event(EventKind::CancelObserved)
                .with_in_flight(self.ctl.in_flight()),
        );
        self.reject_backlog("canceled");
    }

    fn reject_backlog(&mut self, reason: &'static str) {
        for queued in std::mem::take(&mut self.backlog) {
            self.stats.record_dropped(1);
            self.bus.publish(
                self.event(EventKind::JobDropped)
                    .with_index(queued.index)
                    .with_reason(reason),
            );
            let _ = queued.reply.send(Err(JobError::Canceled));
        }
    }

    /// Answers idle waiters once nothing is queued or running.
    ///
    /// Commands already in the channel are absorbed first: a finishing job
    /// may have pushed follow-up work just before it completed.
    fn check_idle(&mut self, rx: &mut mpsc::UnboundedReceiver<Command<T>>, running: &mut Running<T>) {
        if !self.is_idle() {
            self.was_idle = false;
            return;
        }
        while self.is_idle() {
            match rx.try_recv() {
                Ok(cmd) => self.on_command(cmd, running),
                Err(_) => break,
            }
        }
        if !self.is_idle() {
            self.was_idle = false;
            return;
        }

        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
        if !self.was_idle {
            self.was_idle = true;
            self.bus.publish(self.event(EventKind::QueueIdle));
            if let Some(cb) = self.on_idle.as_mut() {
                cb();
            }
        }
    }

    fn finish(mut self) {
        let stats = self.stats.finish();
        self.bus
            .publish(self.event(EventKind::RunCompleted).with_reason(stats.summary()));
        if let Some(cb) = self.on_done.take() {
            cb(&stats);
        }

        let outcome = match self.settled.take() {
            Some(failure) => Err(RunError::Failed(failure)),
            None => self.policy.conclude(&stats.errors).map(|()| stats),
        };
        let _ = self.outcome.set(outcome.clone());
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}
