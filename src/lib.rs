//! # flowvisor
//!
//! **Flowvisor** runs many units of asynchronous work while keeping the number
//! of units in flight under a bound, optionally raising that bound gradually
//! during a warmup period.
//!
//! It provides three engines on top of one admission controller:
//! - [`TaskQueue`]: push ad-hoc jobs, await each result, observe idleness.
//! - [`StreamStage`]: map an input stream to an output stream with an async
//!   function, filters and early termination.
//! - [`WorkerPool`]: the same shape as a stage, with items handled by
//!   [`Worker`]s on dedicated OS threads.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   push(job)             Stream<Item = I>           Stream<Item = I>
//!       │                        │                          │
//!       ▼                        ▼                          ▼
//! ┌──────────────┐      ┌────────────────┐        ┌──────────────────┐
//! │  QueueActor  │      │  StageDriver   │        │    PoolDriver    │
//! │ (backlog +   │      │ (pull, map,    │        │ (seq % N, pending│
//! │  in-flight)  │      │  filter, emit) │        │  table, replies) │
//! └──────┬───────┘      └───────┬────────┘        └────────┬─────────┘
//!        │ admit / release      │ admit / release          │ fixed(N)
//!        ▼                      ▼                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ConcurrencyController (one per engine)                           │
//! │  - WarmupRamp: allowed(t) = floor(1 + (max-1)·t/warmup)           │
//! │  - in_flight ≤ allowed ≤ max                                      │
//! └───────────────────────────────────────────────────────────────────┘
//!        │                      │                          │
//!        │ Publishes            │ Publishes                │ Publishes
//!        │ - JobStarted         │ - JobCompleted           │ - WorkerSpawned
//!        │ - JobQueued          │ - ItemSkipped            │ - WorkerExited
//!        │ - QueueIdle          │ - EndRequested           │ - StaleReply
//!        ▼                      ▼                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                   Bus (broadcast, one per engine)                 │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                            SubscriberSet
//!                          (per-sub queues)
//!                        ┌─────────┼─────────┐
//!                        ▼         ▼         ▼
//!                    LogWriter    sub2      subN
//! ```
//!
//! ### Error policies
//! ```text
//! job fails ──► ErrorPolicy
//!                 ├─ FailFast  → settle the run with that failure, stop admitting
//!                 ├─ Aggregate → keep going, report every failure once the run ends
//!                 └─ Suppress  → log + count, never surface
//! ```
//!
//! Every run ends with [`RunStats`] where
//! `count_in == count_out + count_errors + count_skipped + count_dropped`.
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                          |
//! |-------------------|-------------------------------------------------------------|---------------------------------------------|
//! | **Queue**         | Push jobs, await handles, idle notification, drain.         | [`TaskQueue`], [`JobHandle`]                |
//! | **Stages**        | Concurrent stream mapping with skip/end sentinels.          | [`StreamStage`], [`Mapped`], [`StageStream`]|
//! | **Worker pool**   | Thread-backed stage with request/reply correlation.         | [`WorkerPool`], [`Worker`]                  |
//! | **Admission**     | Bounded concurrency with linear warmup.                     | [`ConcurrencyController`], [`WarmupRamp`]   |
//! | **Policies**      | How failures settle a run and when handles resolve.         | [`ErrorPolicy`], [`ResolveOn`]              |
//! | **Subscriber API**| Hook into run events (logging, metrics, custom subscribers).| [`Subscribe`], [`LogWriter`]                |
//! | **Errors**        | Typed errors for jobs, runs and configuration.              | [`JobError`], [`RunError`], [`ConfigError`] |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use futures::{StreamExt, stream};
//! use flowvisor::{Config, ErrorPolicy, JobError, LogWriter, Mapped, StreamStage, Subscribe};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::default())];
//!
//!     let cfg = Config::new(8)
//!         .with_name("fetch")
//!         .with_warmup(Duration::from_millis(200))
//!         .with_error_policy(ErrorPolicy::Aggregate);
//!
//!     let stage = StreamStage::new(cfg, |url: &'static str, _index| async move {
//!         if url.is_empty() {
//!             return Ok(Mapped::Skip);
//!         }
//!         Ok::<_, JobError>(Mapped::Value(url.len()))
//!     })?
//!     .with_subscribers(subs);
//!
//!     let sizes: Vec<usize> = stage
//!         .run(stream::iter(["a", "", "abc"]))
//!         .filter_map(|r| async move { r.ok() })
//!         .collect()
//!         .await;
//!     assert_eq!(sizes.iter().sum::<usize>(), 4);
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod pool;
mod queue;
mod stage;
mod subscribers;

// ---- Public re-exports ----

pub use config::{Config, PoolConfig};
pub use core::{Clock, ConcurrencyController, RunStats, TokioClock};
pub use error::{ConfigError, Failure, JobError, PoolError, RunError};
pub use events::{Bus, Event, EventKind};
pub use policies::{ErrorPolicy, ResolveOn, WarmupRamp};
pub use pool::{Worker, WorkerPool};
pub use queue::{JobHandle, JobOutcome, QueueBuilder, TaskQueue};
pub use stage::{Mapped, StageExt, StageStream, StreamStage};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
