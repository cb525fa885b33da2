//! # StreamStage: a bounded-concurrency mapping stage.
//!
//! A stage maps upstream items through an async mapper with at most
//! `concurrency` mappers in flight, filters the results, and emits them in
//! completion order.
//!
//! ## Item flow
//! ```text
//! upstream.next()  (only when in_flight < allowed and the output has room)
//!     └─► mapper(item, index)
//!           ├─ Value(v) ─► predicate(v)? ─► emit v        (JobCompleted)
//!           │                     └─ no ─► count skipped  (ItemSkipped "filtered")
//!           ├─ Skip     ─► count skipped                  (ItemSkipped "skip")
//!           ├─ End      ─► stop reading upstream, trip cancellation token (EndRequested)
//!           └─ Err(e)   ─► ErrorPolicy                    (JobFailed)
//! ```
//!
//! ## Flush
//! Once upstream ended (or was cut off) and nothing is in flight, `on_done`
//! receives the [`RunStats`]; under `Aggregate` the combined failure is
//! delivered afterwards as the last item.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::{Clock, ConcurrencyController, RunStats, TokioClock};
use crate::error::{ConfigError, JobError, RunError};
use crate::events::Bus;
use crate::subscribers::{self, Subscribe};

use super::driver::StageDriver;
use super::mapped::Mapped;
use super::output::StageStream;

pub(crate) type Mapper<I, O> =
    Arc<dyn Fn(I, u64) -> BoxFuture<'static, Result<Mapped<O>, JobError>> + Send + Sync>;
pub(crate) type DoneCallback = Box<dyn FnOnce(&RunStats) + Send>;

/// Value filter applied after a successful mapping.
pub(crate) enum Predicate<O> {
    Sync(Arc<dyn Fn(&O) -> bool + Send + Sync>),
    Async(Arc<dyn Fn(&O) -> BoxFuture<'static, bool> + Send + Sync>),
}

impl<O> Clone for Predicate<O> {
    fn clone(&self) -> Self {
        match self {
            Predicate::Sync(f) => Predicate::Sync(Arc::clone(f)),
            Predicate::Async(f) => Predicate::Async(Arc::clone(f)),
        }
    }
}

impl<O> Predicate<O> {
    pub(crate) fn check(&self, value: &O) -> BoxFuture<'static, bool> {
        match self {
            Predicate::Sync(f) => futures::future::ready(f(value)).boxed(),
            Predicate::Async(f) => f(value),
        }
    }
}

/// A configured, not yet running stage from `I` to `O`.
///
/// Running consumes the stage: a stage processes exactly one upstream.
///
/// # Example
/// ```rust
/// use futures::{StreamExt, stream};
/// use flowvisor::{Config, Mapped, StreamStage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let stage = StreamStage::new(Config::new(4), |line: &'static str, _idx| async move {
///     Ok(match line.trim() {
///         "" => Mapped::Skip,
///         "EOF" => Mapped::End,
///         word => Mapped::Value(word.len()),
///     })
/// })?;
///
/// let lens: Vec<usize> = stage
///     .run(stream::iter(["a", "", "abc", "EOF", "ignored"]))
///     .filter_map(|r| async move { r.ok() })
///     .collect()
///     .await;
/// assert_eq!(lens.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct StreamStage<I, O> {
    cfg: Config,
    mapper: Mapper<I, O>,
    predicate: Option<Predicate<O>>,
    on_done: Option<DoneCallback>,
    token: CancellationToken,
    subscribers: Vec<Arc<dyn Subscribe>>,
    clock: Arc<dyn Clock>,
}

impl<I, O> StreamStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a stage with the given mapper.
    ///
    /// The mapper receives the item and its 0-based admission index.
    pub fn new<F, Fut>(cfg: Config, mapper: F) -> Result<Self, ConfigError>
    where
        F: Fn(I, u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Mapped<O>, JobError>> + Send + 'static,
    {
        cfg.validate()?;
        Ok(Self {
            cfg,
            mapper: Arc::new(move |item, index| mapper(item, index).boxed()),
            predicate: None,
            on_done: None,
            token: CancellationToken::new(),
            subscribers: Vec::new(),
            clock: Arc::new(TokioClock),
        })
    }

    /// Only values accepted by `pred` are emitted; rejected ones count as skipped.
    pub fn filter<P>(mut self, pred: P) -> Self
    where
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Predicate::Sync(Arc::new(pred)));
        self
    }

    /// Async variant of [`filter`](Self::filter).
    pub fn filter_async<P, Fut>(mut self, pred: P) -> Self
    where
        P: Fn(&O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.predicate = Some(Predicate::Async(Arc::new(move |v| pred(v).boxed())));
        self
    }

    /// Called once with the final statistics, before any combined failure is delivered.
    pub fn on_done(mut self, cb: impl FnOnce(&RunStats) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(cb));
        self
    }

    /// Shares a cancellation token with other stages, sources or queues.
    ///
    /// Tripping it stops admission; a mapper returning [`Mapped::End`] trips it.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The stage's cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Event subscribers (e.g. [`LogWriter`](crate::LogWriter)).
    pub fn with_subscribers(mut self, subs: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subs;
        self
    }

    /// Clock used to measure warmup progress.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the stage over `upstream`. Must be called within a tokio runtime.
    pub fn run<S>(self, upstream: S) -> StageStream<O>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        self.run_try(upstream.map(Ok))
    }

    /// Runs the stage over a fallible upstream; the first upstream error settles the stage
    /// and is emitted unchanged.
    pub fn run_try<S>(self, upstream: S) -> StageStream<O>
    where
        S: Stream<Item = Result<I, RunError>> + Send + 'static,
    {
        let capacity = self.cfg.concurrency.clamp(1, tokio::sync::Semaphore::MAX_PERMITS);
        let (tx, rx) = mpsc::channel(capacity);
        let (start_tx, start_rx) = oneshot::channel();

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        subscribers::attach(&bus, self.subscribers);

        let driver = StageDriver::new(
            Arc::from(self.cfg.name.as_ref()),
            self.cfg.error_policy,
            ConcurrencyController::new(self.cfg.ramp(), self.clock),
            bus,
            self.mapper,
            self.predicate,
            self.on_done,
            self.token,
        );
        tokio::spawn(driver.run(upstream, tx, start_rx));

        StageStream::new(rx, start_tx)
    }
}
