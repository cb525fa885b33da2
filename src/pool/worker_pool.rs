//! # WorkerPool: stream stage backed by OS threads.
//!
//! Spawns `pool_size` threads up front. Running the pool over an upstream
//! dispatches item `index` to worker `index % pool_size` and emits replies in
//! arrival order, with at most `pool_size` requests outstanding.
//!
//! Failures are always suppressed: logged, counted, never raised. A worker
//! that dies fails its requests with [`JobError::WorkerLost`](crate::JobError::WorkerLost).

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::core::RunStats;
use crate::error::{PoolError, RunError};
use crate::events::Bus;
use crate::stage::StageStream;
use crate::subscribers::{self, Subscribe};

use super::driver::PoolDriver;
use super::worker::{Reply, Request, Worker, worker_main};

pub(crate) type DoneCallback = Box<dyn FnOnce(&RunStats) + Send>;

/// Driver-side handle of one worker thread.
pub(crate) struct WorkerHandle<In> {
    pub id: usize,
    pub tx: std_mpsc::Sender<Request<In>>,
    pub thread: Option<thread::JoinHandle<()>>,
}

impl<In> Drop for WorkerHandle<In> {
    fn drop(&mut self) {
        let _ = self.tx.send(Request::Shutdown);
    }
}

/// A pool of worker threads, ready to run.
///
/// # Example
/// ```rust
/// use futures::{StreamExt, stream};
/// use flowvisor::{JobError, PoolConfig, Worker, WorkerPool};
///
/// struct Upper;
///
/// impl Worker for Upper {
///     type Init = ();
///     type Input = String;
///     type Output = String;
///
///     fn init(_id: usize, _: ()) -> Self {
///         Upper
///     }
///
///     fn handle(&mut self, _index: u64, input: String) -> Result<String, JobError> {
///         Ok(input.to_uppercase())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let pool = WorkerPool::<Upper>::spawn(PoolConfig::new(2), ())?;
/// let mut out: Vec<String> = pool
///     .run(stream::iter(["a".to_string(), "b".to_string()]))
///     .filter_map(|r| async move { r.ok() })
///     .collect()
///     .await;
/// out.sort();
/// assert_eq!(out, vec!["A", "B"]);
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool<W: Worker> {
    cfg: PoolConfig,
    workers: Vec<WorkerHandle<W::Input>>,
    replies: mpsc::UnboundedReceiver<Reply<W::Output>>,
    on_done: Option<DoneCallback>,
    token: CancellationToken,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<W: Worker> WorkerPool<W> {
    /// Spawns `pool_size` worker threads, each initialized with a clone of `payload`.
    ///
    /// Threads are named `{name}-worker-{id}`.
    pub fn spawn(cfg: PoolConfig, payload: W::Init) -> Result<Self, PoolError> {
        cfg.validate()?;

        let (reply_tx, replies) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(cfg.pool_size);
        for id in 0..cfg.pool_size {
            let (tx, rx) = std_mpsc::channel();
            let payload = payload.clone();
            let reply_tx = reply_tx.clone();
            let thread = thread::Builder::new()
                .name(format!("{}-worker-{id}", cfg.name))
                .spawn(move || worker_main::<W>(id, payload, rx, reply_tx))
                .map_err(|source| PoolError::Spawn { worker: id, source })?;
            workers.push(WorkerHandle {
                id,
                tx,
                thread: Some(thread),
            });
        }

        Ok(Self {
            cfg,
            workers,
            replies,
            on_done: None,
            token: CancellationToken::new(),
            subscribers: Vec::new(),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Called once with the final statistics after every worker exited.
    pub fn on_done(mut self, cb: impl FnOnce(&RunStats) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(cb));
        self
    }

    /// Shares a cancellation token; tripping it stops dispatching new items.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Event subscribers (e.g. [`LogWriter`](crate::LogWriter)).
    pub fn with_subscribers(mut self, subs: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subs;
        self
    }

    /// Runs the pool over `upstream`. Must be called within a tokio runtime.
    ///
    /// Workers are shut down once the run ends.
    pub fn run<S>(self, upstream: S) -> StageStream<W::Output>
    where
        S: Stream<Item = W::Input> + Send + 'static,
    {
        self.run_try(upstream.map(Ok))
    }

    /// Runs over a fallible upstream, e.g. the output of a [`StreamStage`](crate::StreamStage).
    ///
    /// The first upstream error stops dispatching and is emitted unchanged.
    pub fn run_try<S>(self, upstream: S) -> StageStream<W::Output>
    where
        S: Stream<Item = Result<W::Input, RunError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.workers.len().max(1));
        let (start_tx, start_rx) = oneshot::channel();

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        subscribers::attach(&bus, self.subscribers);

        let driver = PoolDriver::<W>::new(
            Arc::from(self.cfg.name.as_ref()),
            bus,
            self.workers,
            self.on_done,
            self.token,
        );
        tokio::spawn(driver.run(upstream, self.replies, tx, start_rx));

        StageStream::new(rx, start_tx)
    }
}
