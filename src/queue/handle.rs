//! Deferred result of a pushed job.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::JobError;

/// How a job's handle settled successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    /// The job finished with a value.
    Completed(T),
    /// The job was admitted (`ResolveOn::Start`); it keeps running in the background.
    Started,
    /// The job failed under `ErrorPolicy::Suppress`; the failure was logged and counted.
    Suppressed,
}

impl<T> JobOutcome<T> {
    /// Returns the value of a completed job.
    pub fn into_value(self) -> Option<T> {
        match self {
            JobOutcome::Completed(v) => Some(v),
            JobOutcome::Started | JobOutcome::Suppressed => None,
        }
    }

    /// True if the job finished with a value.
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

/// Future returned by [`TaskQueue::push`](crate::TaskQueue::push).
///
/// Dropping the handle does not cancel the job.
/// If the queue goes away without answering, the handle resolves to
/// [`JobError::Canceled`].
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<JobOutcome<T>, JobError>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<JobOutcome<T>, JobError>>) -> Self {
        Self { rx }
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<JobOutcome<T>, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(JobError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
