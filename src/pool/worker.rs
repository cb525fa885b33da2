//! # Worker trait and the worker thread loop.
//!
//! A [`Worker`] lives on its own OS thread. It is built inside that thread by
//! [`Worker::init`] and then serves requests one at a time.
//!
//! ```text
//! thread "{name}-worker-{id}":
//!   init(id, payload)          panic → Exited { reason } and stop
//!   loop recv():
//!     Run { seq, input }   → handle(seq, input) → Done { seq, result }   (panic → Panicked)
//!     Shutdown / closed    → break
//!   drop(worker) → Exited
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc as std_mpsc;

use tokio::sync::mpsc;

use crate::error::JobError;
use crate::subscribers::panic_message;

/// State owned by one pool thread.
///
/// # Example
/// ```rust
/// use flowvisor::{JobError, Worker};
///
/// struct Checksum {
///     seed: u32,
/// }
///
/// impl Worker for Checksum {
///     type Init = u32;
///     type Input = Vec<u8>;
///     type Output = u32;
///
///     fn init(_id: usize, seed: u32) -> Self {
///         Checksum { seed }
///     }
///
///     fn handle(&mut self, _index: u64, input: Vec<u8>) -> Result<u32, JobError> {
///         if input.is_empty() {
///             return Err(JobError::fail("empty block"));
///         }
///         Ok(input.iter().fold(self.seed, |acc, b| acc.rotate_left(5) ^ u32::from(*b)))
///     }
/// }
/// ```
pub trait Worker: Sized + 'static {
    /// Payload cloned into every worker thread.
    type Init: Clone + Send + 'static;
    /// Request type.
    type Input: Send + 'static;
    /// Response type.
    type Output: Send + 'static;

    /// Builds the worker inside its thread.
    fn init(worker_id: usize, payload: Self::Init) -> Self;

    /// Serves one request. `index` is the request's sequence index.
    fn handle(&mut self, index: u64, input: Self::Input) -> Result<Self::Output, JobError>;
}

/// Driver → worker.
pub(crate) enum Request<In> {
    Run { seq: u64, input: In },
    Shutdown,
}

/// Worker → driver.
pub(crate) enum Reply<Out> {
    Done {
        worker: usize,
        seq: u64,
        result: Result<Out, JobError>,
    },
    /// The worker stopped; `reason` is set when it was not asked to.
    Exited { worker: usize, reason: Option<String> },
}

pub(crate) fn worker_main<W: Worker>(
    id: usize,
    payload: W::Init,
    requests: std_mpsc::Receiver<Request<W::Input>>,
    replies: mpsc::UnboundedSender<Reply<W::Output>>,
) {
    let mut worker = match catch_unwind(AssertUnwindSafe(|| W::init(id, payload))) {
        Ok(worker) => worker,
        Err(panic) => {
            let _ = replies.send(Reply::Exited {
                worker: id,
                reason: Some(format!("init panicked: {}", panic_message(&*panic))),
            });
            return;
        }
    };

    while let Ok(req) = requests.recv() {
        match req {
            Request::Run { seq, input } => {
                let result = catch_unwind(AssertUnwindSafe(|| worker.handle(seq, input)))
                    .unwrap_or_else(|panic| {
                        Err(JobError::Panicked {
                            info: panic_message(&*panic),
                        })
                    });
                if replies
                    .send(Reply::Done {
                        worker: id,
                        seq,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Request::Shutdown => break,
        }
    }

    drop(worker);
    let _ = replies.send(Reply::Exited {
        worker: id,
        reason: None,
    });
}
