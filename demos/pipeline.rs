//! # Two-stage pipeline
//!
//! Demonstrates:
//! - Chaining stages with `pipe`
//! - `Mapped::Skip`, filters and `Mapped::End`
//! - Final statistics through `on_done`

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use flowvisor::{Config, ErrorPolicy, JobError, LogWriter, Mapped, StreamStage, Subscribe};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowvisor=info")),
        )
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    // Parses lines; blank lines are skipped, "EOF" ends the run.
    let parse = StreamStage::new(Config::new(2).with_name("parse"), |line: String, _| async move {
        match line.trim() {
            "" => Ok(Mapped::Skip),
            "EOF" => Ok(Mapped::End),
            s => s.parse::<u64>().map(Mapped::Value).map_err(JobError::fail),
        }
    })?
    .with_subscribers(subs.clone())
    .on_done(|stats| println!("parse: {}", stats.summary()));

    let enrich = StreamStage::new(
        Config::new(8)
            .with_name("enrich")
            .with_warmup(Duration::from_millis(50))
            .with_error_policy(ErrorPolicy::Suppress),
        |n: u64, index| async move {
            tokio::time::sleep(Duration::from_millis(10 * (n % 3))).await;
            Ok(Mapped::Value(format!("#{index}: {n}² = {}", n * n)))
        },
    )?
    .filter(|line: &String| !line.ends_with("= 0"))
    .with_subscribers(subs)
    .on_done(|stats| println!("enrich: {}", stats.summary()));

    let input = ["0", "1", "", "2", "3", "", "4", "EOF", "5", "6"].map(String::from);
    let mut out = parse.run(stream::iter(input)).pipe(enrich);

    while let Some(item) = out.next().await {
        match item {
            Ok(line) => println!("{line}"),
            Err(err) => println!("pipeline failed: {err}"),
        }
    }
    Ok(())
}
