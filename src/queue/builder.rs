//! Builder for [`TaskQueue`].

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::{Clock, ConcurrencyController, RunStats, TokioClock};
use crate::error::ConfigError;
use crate::events::Bus;
use crate::subscribers::{self, Subscribe};

use super::actor::{DoneCallback, IdleCallback, QueueActor};
use super::task_queue::TaskQueue;

/// Configures and spawns a [`TaskQueue`].
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use flowvisor::{Config, LogWriter, TaskQueue};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let queue = TaskQueue::<()>::builder(Config::new(2).with_name("uploads"))
///     .on_done(|stats| println!("uploaded {} file(s)", stats.count_out))
///     .with_subscribers(vec![Arc::new(LogWriter::new())])
///     .build()?;
/// queue.push(|| async { Ok(()) });
/// queue.drain().await?;
/// # Ok(())
/// # }
/// ```
pub struct QueueBuilder<T> {
    cfg: Config,
    on_idle: Option<IdleCallback>,
    on_done: Option<DoneCallback>,
    token: Option<CancellationToken>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + 'static> QueueBuilder<T> {
    pub(crate) fn new(cfg: Config) -> Self {
        Self {
            cfg,
            on_idle: None,
            on_done: None,
            token: None,
            subscribers: Vec::new(),
            clock: Arc::new(TokioClock),
            _marker: std::marker::PhantomData,
        }
    }

    /// Called each time the queue becomes idle after having work.
    pub fn on_idle(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_idle = Some(Box::new(cb));
        self
    }

    /// Called once with the final statistics when the run completes.
    pub fn on_done(mut self, cb: impl FnOnce(&RunStats) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(cb));
        self
    }

    /// Uses an external cancellation token instead of a private one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
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

    /// Validates the configuration and spawns the queue actor.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Result<TaskQueue<T>, ConfigError> {
        self.cfg.validate()?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        subscribers::attach(&bus, self.subscribers);

        let token = self.token.unwrap_or_default();
        let outcome = Arc::new(OnceLock::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = QueueActor::new(
            Arc::from(self.cfg.name.as_ref()),
            self.cfg.error_policy,
            self.cfg.resolve_on,
            ConcurrencyController::new(self.cfg.ramp(), self.clock),
            bus.clone(),
            self.on_idle,
            self.on_done,
            Arc::clone(&outcome),
        );
        tokio::spawn(actor.run(rx, token.clone()));

        Ok(TaskQueue::from_parts(tx, bus, token, outcome))
    }
}
