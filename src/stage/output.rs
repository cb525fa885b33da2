//! # Stage output stream and pipeline chaining.
//!
//! [`StageStream`] is what [`StreamStage::run`](crate::StreamStage::run) and
//! [`WorkerPool::run`](crate::WorkerPool::run) return: mapped values in
//! completion order, optionally followed by exactly one terminal [`RunError`].
//!
//! ```text
//! source ──► StreamStage A ──► StageStream ──pipe──► StreamStage B ──► StageStream ──► consumer
//!              (driver)        (bounded mpsc)          (driver)
//! ```
//!
//! The engine behind the stream starts on the first poll. Dropping the stream
//! stops admission; items already in flight drain in the background.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::RunError;

use super::stream_stage::StreamStage;

/// Output of a stage or pool run.
#[must_use = "streams do nothing unless polled"]
pub struct StageStream<O> {
    rx: mpsc::Receiver<Result<O, RunError>>,
    start: Option<oneshot::Sender<()>>,
}

impl<O> StageStream<O> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<O, RunError>>, start: oneshot::Sender<()>) -> Self {
        Self {
            rx,
            start: Some(start),
        }
    }
}

impl<O: Send + 'static> StageStream<O> {
    /// Feeds this stream into `next`; errors from this stage pass through unchanged.
    pub fn pipe<O2>(self, next: StreamStage<O, O2>) -> StageStream<O2>
    where
        O2: Send + 'static,
    {
        next.run_try(self)
    }
}

impl<O> Stream for StageStream<O> {
    type Item = Result<O, RunError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(start) = self.start.take() {
            let _ = start.send(());
        }
        self.rx.poll_recv(cx)
    }
}

/// Runs any stream through a [`StreamStage`].
///
/// # Example
/// ```rust
/// use futures::{StreamExt, stream};
/// use flowvisor::{Config, Mapped, StageExt, StreamStage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let double = StreamStage::new(Config::new(1), |x: u32, _| async move { Ok(Mapped::Value(x * 2)) })?;
/// let out: Vec<u32> = stream::iter(1..=3)
///     .through(double)
///     .map(|r| r.expect("no failures"))
///     .collect()
///     .await;
/// assert_eq!(out, vec![2, 4, 6]);
/// # Ok(())
/// # }
/// ```
pub trait StageExt: Stream + Sized {
    /// Equivalent to `stage.run(self)`.
    fn through<O>(self, stage: StreamStage<Self::Item, O>) -> StageStream<O>
    where
        Self: Send + 'static,
        Self::Item: Send + 'static,
        O: Send + 'static,
    {
        stage.run(self)
    }
}

impl<S: Stream> StageExt for S {}
