//! # PoolDriver: the task behind a running [`WorkerPool`](crate::WorkerPool).
//!
//! ## Loop
//! ```text
//! WorkerSpawned × N, wait for the first poll of the StageStream
//! loop {
//!   ├─► done? (admission over && nothing pending && outbox delivered) → break
//!   └─► select (biased):
//!        ├─ reply Done     → pending.complete(seq) → emit / count failure (stale → StaleReply)
//!        ├─ reply Exited   → worker lost: its pending requests fail with WorkerLost
//!        ├─ output permit  → deliver outbox front
//!        ├─ token / consumer gone → stop dispatching
//!        └─ upstream.next() → seq, pending.insert, send Run to worker seq % N
//! }
//! shutdown: Shutdown × alive workers → await Exited acks → join threads
//! flush: RunStats → RunCompleted → on_done
//! ```

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::{ConcurrencyController, StatsRecorder};
use crate::error::{Failure, JobError, RunError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::ErrorPolicy;

use super::pending::PendingTable;
use super::worker::{Reply, Request, Worker};
use super::worker_pool::{DoneCallback, WorkerHandle};

/// Failures in a pool are always suppressed.
const POLICY: ErrorPolicy = ErrorPolicy::Suppress;

type Outbox<O> = VecDeque<Result<O, RunError>>;

pub(crate) struct PoolDriver<W: Worker> {
    name: Arc<str>,
    ctl: ConcurrencyController,
    bus: Bus,
    stats: StatsRecorder,
    workers: Vec<WorkerHandle<W::Input>>,
    alive: Vec<bool>,
    pending: PendingTable,
    on_done: Option<DoneCallback>,
    token: CancellationToken,
    next_seq: u64,
    settled: bool,
    consumer_gone: bool,
    _worker: PhantomData<fn() -> W>,
}

impl<W: Worker> PoolDriver<W> {
    pub fn new(
        name: Arc<str>,
        bus: Bus,
        workers: Vec<WorkerHandle<W::Input>>,
        on_done: Option<DoneCallback>,
        token: CancellationToken,
    ) -> Self {
        let size = workers.len();
        Self {
            name,
            ctl: ConcurrencyController::fixed(u32::try_from(size).unwrap_or(u32::MAX)),
            bus,
            stats: StatsRecorder::new(POLICY.collects_errors()),
            workers,
            alive: vec![true; size],
            pending: PendingTable::new(),
            on_done,
            token,
            next_seq: 0,
            settled: false,
            consumer_gone: false,
            _worker: PhantomData,
        }
    }

    pub async fn run<S>(
        mut self,
        upstream: S,
        mut replies: mpsc::UnboundedReceiver<Reply<W::Output>>,
        tx: mpsc::Sender<Result<W::Output, RunError>>,
        start: oneshot::Receiver<()>,
    ) where
        S: Stream<Item = Result<W::Input, RunError>> + Send + 'static,
    {
        for worker in &self.workers {
            self.bus
                .publish(self.event(EventKind::WorkerSpawned).with_worker(worker.id));
        }
        if start.await.is_err() {
            self.consumer_gone = true;
        }

        let mut upstream = Box::pin(upstream);
        let mut outbox: Outbox<W::Output> = VecDeque::new();
        let mut upstream_done = false;
        let mut cancel_seen = false;
        let mut replies_open = true;
        let token = self.token.clone();
        let room = self.workers.len();

        loop {
            let closed = upstream_done || self.settled || self.consumer_gone || cancel_seen;
            if closed && self.pending.is_empty() && outbox.is_empty() {
                break;
            }
            let can_admit = !closed && outbox.len() < room && self.ctl.admit();

            tokio::select! {
                biased;

                reply = replies.recv(), if replies_open => match reply {
                    Some(reply) => self.on_reply(reply, &mut outbox),
                    None => {
                        replies_open = false;
                        self.lose_all();
                    }
                },
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
                    self.bus.publish(
                        self.event(EventKind::CancelObserved)
                            .with_in_flight(self.ctl.in_flight()),
                    );
                }
                _ = tx.closed(), if !self.consumer_gone => {
                    self.on_consumer_gone(&mut outbox);
                }
                next = upstream.next(), if can_admit => match next {
                    Some(Ok(input)) => self.dispatch(input),
                    Some(Err(err)) => self.on_upstream_error(err, &mut outbox),
                    None => upstream_done = true,
                },
            }
        }

        self.shutdown(&mut replies, replies_open).await;
        self.flush();
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_engine(Arc::clone(&self.name))
    }

    fn dispatch(&mut self, input: W::Input) {
        let acquired = self.ctl.try_acquire();
        debug_assert!(acquired, "item pulled without capacity");

        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.record_in();
        let worker = usize::try_from(seq % self.workers.len() as u64).unwrap_or(0);

        if !self.alive[worker] {
            self.ctl.release();
            self.on_failed(Failure::new(seq, JobError::WorkerLost { worker }));
            return;
        }

        self.pending.insert(seq, worker);
        self.bus.publish(
            self.event(EventKind::JobStarted)
                .with_index(seq)
                .with_worker(worker)
                .with_in_flight(self.ctl.in_flight())
                .with_allowed(self.ctl.current()),
        );
        if self.workers[worker].tx.send(Request::Run { seq, input }).is_err() {
            // The thread is gone; its Exited reply may still be on the way.
            self.pending.complete(seq);
            self.ctl.release();
            self.alive[worker] = false;
            self.on_failed(Failure::new(seq, JobError::WorkerLost { worker }));
        }
    }

    fn on_reply(&mut self, reply: Reply<W::Output>, outbox: &mut Outbox<W::Output>) {
        match reply {
            Reply::Done {
                worker,
                seq,
                result,
            } => {
                if self.pending.complete(seq).is_none() {
                    self.bus.publish(
                        self.event(EventKind::StaleReply)
                            .with_index(seq)
                            .with_worker(worker),
                    );
                    return;
                }
                self.ctl.release();
                match result {
                    Ok(_) if self.settled => self.drop_result(seq, "settled"),
                    Ok(_) if self.consumer_gone => self.drop_result(seq, "consumer_gone"),
                    Ok(value) => {
                        self.bus.publish(
                            self.event(EventKind::JobCompleted)
                                .with_index(seq)
                                .with_worker(worker)
                                .with_in_flight(self.ctl.in_flight()),
                        );
                        outbox.push_back(Ok(value));
                    }
                    Err(error) => self.on_failed(Failure::new(seq, error)),
                }
            }
            Reply::Exited { worker, reason } => self.on_exited(worker, reason),
        }
    }

    fn on_exited(&mut self, worker: usize, reason: Option<String>) {
        if let Some(alive) = self.alive.get_mut(worker) {
            *alive = false;
        }
        let mut ev = self.event(EventKind::WorkerExited).with_worker(worker);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);

        for seq in self.pending.drain_worker(worker) {
            self.ctl.release();
            self.on_failed(Failure::new(seq, JobError::WorkerLost { worker }));
        }
    }

    /// Every reply sender is gone: nothing pending can be answered anymore.
    fn lose_all(&mut self) {
        self.alive.iter_mut().for_each(|a| *a = false);
        for seq in self.pending.drain() {
            self.ctl.release();
            let worker = usize::try_from(seq % self.workers.len() as u64).unwrap_or(0);
            self.on_failed(Failure::new(seq, JobError::WorkerLost { worker }));
        }
    }

    fn on_failed(&mut self, failure: Failure) {
        self.stats.record_error(&failure);
        self.bus.publish(
            self.event(EventKind::JobFailed)
                .with_index(failure.index)
                .with_in_flight(self.ctl.in_flight())
                .with_policy(POLICY.as_label())
                .with_reason(failure.error.to_string()),
        );
    }

    fn drop_result(&mut self, seq: u64, reason: &'static str) {
        self.stats.record_dropped(1);
        self.bus.publish(
            self.event(EventKind::JobDropped)
                .with_index(seq)
                .with_reason(reason),
        );
    }

    fn on_upstream_error(&mut self, err: RunError, outbox: &mut Outbox<W::Output>) {
        self.stats.record_upstream_failure();
        if self.settled {
            return;
        }
        self.settled = true;
        self.bus.publish(
            self.event(EventKind::RunSettled)
                .with_reason(format!("upstream: {err}")),
        );
        let undelivered = outbox.drain(..).filter(Result::is_ok).count();
        self.stats.record_dropped(undelivered as u64);
        if !self.consumer_gone {
            outbox.push_back(Err(err));
        }
    }

    fn on_consumer_gone(&mut self, outbox: &mut Outbox<W::Output>) {
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

    /// Asks every live worker to exit, waits for the acknowledgements and joins the threads.
    async fn shutdown(
        &mut self,
        replies: &mut mpsc::UnboundedReceiver<Reply<W::Output>>,
        replies_open: bool,
    ) {
        let mut waiting = 0usize;
        for worker in &self.workers {
            if self.alive[worker.id] && worker.tx.send(Request::Shutdown).is_ok() {
                waiting += 1;
            }
        }

        while replies_open && waiting > 0 {
            match replies.recv().await {
                Some(Reply::Exited { worker, reason }) => {
                    if self.alive.get(worker).copied().unwrap_or(false) {
                        waiting -= 1;
                    }
                    self.on_exited(worker, reason);
                }
                Some(Reply::Done { worker, seq, .. }) => {
                    self.bus.publish(
                        self.event(EventKind::StaleReply)
                            .with_index(seq)
                            .with_worker(worker),
                    );
                }
                None => break,
            }
        }

        for seq in self.pending.drain() {
            self.ctl.release();
            self.drop_result(seq, "shutdown");
        }

        let threads: Vec<_> = self
            .workers
            .iter_mut()
            .filter_map(|w| w.thread.take())
            .collect();
        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;
        if let Err(err) = joined {
            tracing::warn!(pool = %self.name, error = %err, "joining worker threads failed");
        }
    }

    fn flush(mut self) {
        let stats = self.stats.finish();
        self.bus
            .publish(self.event(EventKind::RunCompleted).with_reason(stats.summary()));
        if let Some(cb) = self.on_done.take() {
            cb(&stats);
        }
    }
}
