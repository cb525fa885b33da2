//! # CPU-bound worker pool
//!
//! Demonstrates:
//! - Per-thread worker state built from a shared payload
//! - Suppressed failures and panics
//! - Graceful shutdown once the input ends

use std::sync::Arc;

use futures::{StreamExt, stream};
use flowvisor::{JobError, LogWriter, PoolConfig, Subscribe, Worker, WorkerPool};
use tracing_subscriber::EnvFilter;

/// Counts primes below `n` with a per-worker sieve buffer.
struct PrimeCounter {
    id: usize,
    limit: usize,
    sieve: Vec<bool>,
}

impl Worker for PrimeCounter {
    type Init = usize;
    type Input = usize;
    type Output = (usize, usize, usize);

    fn init(id: usize, limit: usize) -> Self {
        PrimeCounter {
            id,
            limit,
            sieve: Vec::with_capacity(limit),
        }
    }

    fn handle(&mut self, _index: u64, n: usize) -> Result<Self::Output, JobError> {
        if n > self.limit {
            return Err(JobError::fail(format!("{n} exceeds the sieve limit")));
        }
        self.sieve.clear();
        self.sieve.resize(n, true);
        let mut count = 0;
        for i in 2..n {
            if self.sieve[i] {
                count += 1;
                (i * i..n).step_by(i).for_each(|j| self.sieve[j] = false);
            }
        }
        Ok((self.id, n, count))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowvisor=info")),
        )
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let pool = WorkerPool::<PrimeCounter>::spawn(PoolConfig::new(4).with_name("sieve"), 2_000_000)?
        .with_subscribers(subs)
        .on_done(|stats| println!("pool: {}", stats.summary()));

    let inputs = [10_000, 100_000, 5_000_000, 1_000_000, 250_000, 2_000_000];
    let mut out = pool.run(stream::iter(inputs));

    while let Some(item) = out.next().await {
        if let Ok((worker, n, count)) = item {
            println!("worker {worker}: {count} primes below {n}");
        }
    }
    Ok(())
}
