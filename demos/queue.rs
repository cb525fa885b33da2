//! # Crawl-style job queue
//!
//! Demonstrates:
//! - Pushing jobs that push more jobs
//! - Warmup ramp on a bounded queue
//! - Waiting for idleness, then draining
//!
//! Run with `RUST_LOG=flowvisor=debug cargo run --example queue` to see every event.

use std::sync::Arc;
use std::time::Duration;

use flowvisor::{Config, ErrorPolicy, JobError, LogWriter, Subscribe, TaskQueue};
use tracing_subscriber::EnvFilter;

const MAX_DEPTH: u32 = 3;

fn visit(queue: TaskQueue<String>, path: String, depth: u32) {
    let child_queue = queue.clone();
    let _handle = queue.push(move || async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        if path.ends_with("/2/1") {
            return Err(JobError::fail(format!("{path}: broken link")));
        }
        if depth < MAX_DEPTH {
            for child in 1..=2 {
                visit(child_queue.clone(), format!("{path}/{child}"), depth + 1);
            }
        }
        Ok(path)
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowvisor=info")),
        )
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let cfg = Config::new(4)
        .with_name("crawl")
        .with_warmup(Duration::from_millis(100))
        .with_error_policy(ErrorPolicy::Aggregate);

    let queue = TaskQueue::<String>::builder(cfg)
        .with_subscribers(subs)
        .on_idle(|| tracing::info!("crawl frontier exhausted"))
        .build()?;

    visit(queue.clone(), "root".to_string(), 0);
    queue.on_idle().await;

    match queue.drain().await {
        Ok(stats) => println!("done: {}", stats.summary()),
        Err(err) => println!("finished with errors: {err}"),
    }
    Ok(())
}
