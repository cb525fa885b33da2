//! # Parallel worker pool.
//!
//! [`WorkerPool`] is the thread-backed variant of a stream stage: items are
//! handled by [`Worker`]s on dedicated OS threads, for CPU-bound work that
//! must not run on the async executor.
//!
//! ## Message flow
//! ```text
//!                ┌──── std mpsc ────► worker 0 ───┐
//! PoolDriver ────┼──── std mpsc ────► worker 1 ───┼──► tokio mpsc (replies) ──► PoolDriver
//!  (seq % N)     └──── std mpsc ────► worker N-1 ─┘
//! ```
//!
//! Requests carry a sequence id; replies are matched through a pending table
//! and anything unmatched is reported as stale.

mod driver;
mod pending;
mod worker;
mod worker_pool;

pub use worker::Worker;
pub use worker_pool::WorkerPool;

#[cfg(test)]
mod tests;
