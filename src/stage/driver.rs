//! # StageDriver: the task behind a running [`StreamStage`](crate::StreamStage).
//!
//! Owns the controller, the statistics, the output buffer and every mapper
//! future. Upstream is pulled one item at a time and only while the controller
//! admits, so a full stage simply stops asking.
//!
//! ## Loop
//! ```text
//! wait for the first poll of the StageStream
//! loop {
//!   ├─► done? (admission over && nothing in flight && outbox delivered) → break
//!   └─► select (biased):
//!        ├─ mapper finished    → release slot, Value/Skip/End/Err handling
//!        ├─ output permit      → deliver outbox front (count_out)
//!        ├─ token cancelled    → stop admission (CancelObserved unless self-inflicted)
//!        ├─ consumer gone      → stop admission, drop undelivered results
//!        ├─ upstream.next()    → admit (only while in_flight < allowed and outbox has room)
//!        └─ ramp wakeup        → re-evaluate admission
//! }
//! flush: RunStats → RunCompleted → on_done → combined failure (Aggregate)
//! ```

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::core::{ConcurrencyController, StatsRecorder};
use crate::error::{Failure, JobError, RunError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::ErrorPolicy;
use crate::subscribers::panic_message;

use super::mapped::Mapped;
use super::stream_stage::{DoneCallback, Mapper, Predicate};

/// Result of one admitted item after mapping and filtering.
enum Step<O> {
    Value(O),
    Filtered,
    Skip,
    End,
}

struct Done<O> {
    index: u64,
    result: Result<Step<O>, JobError>,
}

type Running<O> = FuturesUnordered<BoxFuture<'static, Done<O>>>;
type Outbox<O> = VecDeque<Result<O, RunError>>;

pub(crate) struct StageDriver<I, O> {
    name: Arc<str>,
    policy: ErrorPolicy,
    ctl: ConcurrencyController,
    bus: Bus,
    stats: StatsRecorder,
    mapper: Mapper<I, O>,
    predicate: Option<Predicate<O>>,
    on_done: Option<DoneCallback>,
    token: CancellationToken,
    next_index: u64,
    settled: bool,
    ended: bool,
    consumer_gone: bool,
}

impl<I, O> StageDriver<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Arc<str>,
        policy: ErrorPolicy,
        ctl: ConcurrencyController,
        bus: Bus,
        mapper: Mapper<I, O>,
        predicate: Option<Predicate<O>>,
        on_done: Option<DoneCallback>,
        token: CancellationToken,
    ) -> Self {
        Self {
            name,
            policy,
            ctl,
            bus,
            stats: StatsRecorder::new(policy.collects_errors()),
            mapper,
            predicate,
            on_done,
            token,
            next_index: 0,
            settled: false,
            ended: false,
            consumer_gone: false,
        }
    }

    pub async fn run<S>(
        mut self,
        upstream: S,
        tx: mpsc::Sender<Result<O, RunError>>,
        start: oneshot::Receiver<()>,
    ) where
        S: Stream<Item = Result<I, RunError>> + Send + 'static,
    {
        // Lazy: nothing is pulled before the consumer asks.
        if start.await.is_err() {
            self.consumer_gone = true;
        }

        let mut upstream = Box::pin(upstream);
        let mut running: Running<O> = FuturesUnordered::new();
        let mut outbox: Outbox<O> = VecDeque::new();
        let mut upstream_done = false;
        let mut cancel_seen = false;
        let token = self.token.clone();
        let room = usize::try_from(self.ctl.max()).unwrap_or(usize::MAX);

        loop {
            let closed = upstream_done || self.settled || self.ended || self.consumer_gone || cancel_seen;
            if closed && running.is_empty() && outbox.is_empty() {
                break;
            }
            let can_admit = !closed && outbox.len() < room && self.ctl.admit();
            let wake = if closed || outbox.len() >= room {
                None
            } else {
                self.ctl.next_wakeup()
            };

            tokio::select! {
                biased;

                Some(done) = running.next(), if !running.is_empty() => {
                    self.on_done_item(done, &mut outbox);
                }
                permit = tx.reserve(), if !outbox.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(item) = outbox.pop_front() {
                            if item.is_ok() {
                                self.stats.record_out();
                            }
                            permit.send(item);
                        }
                    }
                    Err(_) => self.on_consumer_gone(&mut outbox),
                },
                _ = token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    if !self.ended {
                        self.bus.publish(
                            self.event(EventKind::CancelObserved)
                                .with_in_flight(self.ctl.in_flight()),
                        );
                    }
                }
                _ = tx.closed(), if !self.consumer_gone => {
                    self.on_consumer_gone(&mut outbox);
                }
                next = upstream.next(), if can_admit => match next {
                    Some(Ok(item)) => self.admit(item, &mut running),
                    Some(Err(err)) => self.on_upstream_error(err, &mut outbox),
                    None => upstream_done = true,
                },
                _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {}
            }
            self.note_ramp();
        }

        self.flush(&tx).await;
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_engine(Arc::clone(&self.name))
    }

    fn note_ramp(&mut self) {
        if let Some(allowed) = self.ctl.take_raised() {
            self.bus
                .publish(self.event(EventKind::ConcurrencyRaised).with_allowed(allowed));
        }
    }

    fn admit(&mut self, item: I, running: &mut Running<O>) {
        let acquired = self.ctl.try_acquire();
        debug_assert!(acquired, "item pulled without capacity");

        let index = self.next_index;
        self.next_index += 1;
        self.stats.record_in();
        self.bus.publish(
            self.event(EventKind::JobStarted)
                .with_index(index)
                .with_in_flight(self.ctl.in_flight())
                .with_allowed(self.ctl.current()),
        );

        let mapper = Arc::clone(&self.mapper);
        let predicate = self.predicate.clone();
        running.push(
            async move {
                let mapped = AssertUnwindSafe(async move {
                    let step = match mapper(item, index).await? {
                        Mapped::Value(v) => {
                            let check = predicate.as_ref().map(|p| p.check(&v));
                            let keep = match check {
                                Some(check) => check.await,
                                None => true,
                            };
                            if keep { Step::Value(v) } else { Step::Filtered }
                        }
                        Mapped::Skip => Step::Skip,
                        Mapped::End => Step::End,
                    };
                    Ok::<_, JobError>(step)
                })
                .catch_unwind()
                .await;
                let result = mapped.unwrap_or_else(|panic| {
                    Err(JobError::Panicked {
                        info: panic_message(&*panic),
                    })
                });
                Done { index, result }
            }
            .boxed(),
        );
    }

    fn on_done_item(&mut self, done: Done<O>, outbox: &mut Outbox<O>) {
        let Done { index, result } = done;
        self.ctl.release();

        match result {
            Ok(Step::Value(v)) => {
                if self.settled || self.consumer_gone {
                    self.drop_result(index, if self.settled { "settled" } else { "consumer_gone" });
                } else {
                    self.bus.publish(
                        self.event(EventKind::JobCompleted)
                            .with_index(index)
                            .with_in_flight(self.ctl.in_flight()),
                    );
                    outbox.push_back(Ok(v));
                }
            }
            Ok(Step::Filtered) => self.skip(index, "filtered"),
            Ok(Step::Skip) => self.skip(index, "skip"),
            Ok(Step::End) => {
                self.skip(index, "end");
                if !self.ended {
                    self.ended = true;
                    self.bus
                        .publish(self.event(EventKind::EndRequested).with_index(index));
                    self.token.cancel();
                }
            }
            Err(error) => self.on_failed(Failure::new(index, error), outbox),
        }
    }

    fn skip(&mut self, index: u64, reason: &'static str) {
        self.stats.record_skipped();
        self.bus.publish(
            self.event(EventKind::ItemSkipped)
                .with_index(index)
                .with_reason(reason),
        );
    }

    fn drop_result(&mut self, index: u64, reason: &'static str) {
        self.stats.record_dropped(1);
        self.bus.publish(
            self.event(EventKind::JobDropped)
                .with_index(index)
                .with_reason(reason),
        );
    }

    fn on_failed(&mut self, failure: Failure, outbox: &mut Outbox<O>) {
        self.stats.record_error(&failure);
        self.bus.publish(
            self.event(EventKind::JobFailed)
                .with_index(failure.index)
                .with_in_flight(self.ctl.in_flight())
                .with_policy(self.policy.as_label())
                .with_reason(failure.error.to_string()),
        );

        if self.policy.handling().settle_run && !self.settled {
            self.bus.publish(
                self.event(EventKind::RunSettled)
                    .with_index(failure.index)
                    .with_reason(failure.error.to_string()),
            );
            self.settle(RunError::Failed(failure), outbox);
        }
    }

    fn on_upstream_error(&mut self, err: RunError, outbox: &mut Outbox<O>) {
        self.stats.record_upstream_failure();
        if self.settled {
            return;
        }
        self.bus.publish(
            self.event(EventKind::RunSettled)
                .with_reason(format!("upstream: {err}")),
        );
        self.settle(err, outbox);
    }

    /// Latches the terminal error: buffered values are discarded and the error goes out next.
    fn settle(&mut self, err: RunError, outbox: &mut Outbox<O>) {
        self.settled = true;
        let undelivered = outbox.drain(..).filter(Result::is_ok).count();
        self.stats.record_dropped(undelivered as u64);
        if !self.consumer_gone {
            outbox.push_back(Err(err));
        }
    }

    fn on_consumer_gone(&mut self, outbox: &mut Outbox<O>) {
        if self.consumer_gone {
            return;
        }
        self.consumer_gone = true;
        let undelivered = outbox.drain(..).filter(Result::is_ok).count();
        self.stats.record_dropped(undelivered as u64);
        self.bus.publish(
            self.event(EventKind::JobDropped)
                .with_in_flight(self.ctl.in_flight())
                .with_reason(format!("consumer_gone ({undelivered} undelivered)")),
        );
    }

    async fn flush(mut self, tx: &mpsc::Sender<Result<O, RunError>>) {
        let stats = self.stats.finish();
        self.bus
            .publish(self.event(EventKind::RunCompleted).with_reason(stats.summary()));
        if let Some(cb) = self.on_done.take() {
            cb(&stats);
        }

        if self.settled || self.consumer_gone {
            return;
        }
        if let Err(err) = self.policy.conclude(&stats.errors) {
            let _ = tx.send(Err(err)).await;
        }
    }
}
