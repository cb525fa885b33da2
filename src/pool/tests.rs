use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::sync::oneshot;

use crate::{
    Config, ConfigError, Event, EventKind, Failure, JobError, Mapped, PoolConfig, PoolError,
    RunError, RunStats, StreamStage, Subscribe, Worker, WorkerPool,
};

struct Squarer {
    offset: u64,
}

impl Worker for Squarer {
    type Init = u64;
    type Input = u64;
    type Output = u64;

    fn init(_id: usize, offset: u64) -> Self {
        Squarer { offset }
    }

    fn handle(&mut self, _index: u64, x: u64) -> Result<u64, JobError> {
        match x {
            7 => Err(JobError::fail("seven")),
            13 => panic!("unlucky"),
            _ => Ok(x * x + self.offset),
        }
    }
}

struct Namer;

impl Worker for Namer {
    type Init = ();
    type Input = u32;
    type Output = String;

    fn init(_id: usize, _: ()) -> Self {
        Namer
    }

    fn handle(&mut self, _index: u64, _x: u32) -> Result<String, JobError> {
        Ok(std::thread::current().name().unwrap_or_default().to_string())
    }
}

/// Panics in `init` on worker 1.
struct Fragile;

impl Worker for Fragile {
    type Init = ();
    type Input = u32;
    type Output = u32;

    fn init(id: usize, _: ()) -> Self {
        if id == 1 {
            panic!("no device");
        }
        Fragile
    }

    fn handle(&mut self, _index: u64, x: u32) -> Result<u32, JobError> {
        Ok(x)
    }
}

/// Counts drops of worker state.
struct Counted {
    exits: Arc<AtomicUsize>,
}

impl Worker for Counted {
    type Init = Arc<AtomicUsize>;
    type Input = u32;
    type Output = u32;

    fn init(_id: usize, exits: Arc<AtomicUsize>) -> Self {
        Counted { exits }
    }

    fn handle(&mut self, _index: u64, x: u32) -> Result<u32, JobError> {
        Ok(x + 1)
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(EventKind, Option<String>)>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, ev: &Event) {
        self.0
            .lock()
            .unwrap()
            .push((ev.kind, ev.reason.as_deref().map(str::to_string)));
    }
}

fn stats_channel() -> (oneshot::Receiver<RunStats>, impl FnOnce(&RunStats) + Send + 'static) {
    let (tx, rx) = oneshot::channel();
    (rx, move |stats: &RunStats| {
        let _ = tx.send(stats.clone());
    })
}

#[tokio::test]
async fn replies_are_correlated_and_failures_suppressed() {
    let (stats, on_done) = stats_channel();
    let pool = WorkerPool::<Squarer>::spawn(PoolConfig::new(3), 1)
        .unwrap()
        .on_done(on_done);

    let out: Vec<Result<u64, RunError>> = pool.run(stream::iter(0..20u64)).collect().await;
    assert!(out.iter().all(Result::is_ok));

    let got: BTreeSet<u64> = out.into_iter().map(Result::unwrap).collect();
    let want: BTreeSet<u64> = (0..20u64)
        .filter(|x| *x != 7 && *x != 13)
        .map(|x| x * x + 1)
        .collect();
    assert_eq!(got, want);

    let stats = stats.await.unwrap();
    assert!(!stats.ok);
    assert_eq!(stats.count_in, 20);
    assert_eq!(stats.count_out, 18);
    assert_eq!(stats.count_errors, 2);
    assert!(stats.errors.is_empty());
    assert!(stats.is_balanced());
}

#[tokio::test]
async fn worker_threads_are_named_and_round_robin() {
    let pool = WorkerPool::<Namer>::spawn(PoolConfig::new(2).with_name("resize"), ()).unwrap();
    assert_eq!(pool.size(), 2);

    let names: BTreeSet<String> = pool
        .run(stream::iter(0..6u32))
        .map(Result::unwrap)
        .collect()
        .await;
    let want: BTreeSet<String> = ["resize-worker-0", "resize-worker-1"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(names, want);
}

#[tokio::test]
async fn dead_worker_fails_its_requests() {
    let recorder = Arc::new(Recorder::default());
    let (stats, on_done) = stats_channel();
    let pool = WorkerPool::<Fragile>::spawn(PoolConfig::new(2), ())
        .unwrap()
        .on_done(on_done)
        .with_subscribers(vec![recorder.clone()]);

    let mut out: Vec<u32> = pool
        .run(stream::iter(0..6u32))
        .map(Result::unwrap)
        .collect()
        .await;
    out.sort_unstable();
    assert_eq!(out, vec![0, 2, 4]);

    let stats = stats.await.unwrap();
    assert_eq!(stats.count_errors, 3);
    assert!(stats.is_balanced());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = recorder.0.lock().unwrap().clone();
    let lost = events
        .iter()
        .filter(|(kind, reason)| {
            *kind == EventKind::JobFailed
                && reason.as_deref() == Some("worker 1 is no longer available")
        })
        .count();
    assert_eq!(lost, 3);
    assert!(events.iter().any(|(kind, reason)| {
        *kind == EventKind::WorkerExited
            && reason.as_deref() == Some("init panicked: no device")
    }));
}

#[tokio::test]
async fn workers_exit_before_the_output_ends() {
    let exits = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::<Counted>::spawn(PoolConfig::new(3), Arc::clone(&exits)).unwrap();

    let out: Vec<u32> = pool
        .run(stream::iter(0..9u32))
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(out.len(), 9);
    assert_eq!(exits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn upstream_error_passes_through_unchanged() {
    let stage = StreamStage::new(Config::new(1), |x: u64, i| async move {
        if i == 1 {
            Err(JobError::fail("bad record"))
        } else {
            Ok(Mapped::Value(x))
        }
    })
    .unwrap();
    let pool = WorkerPool::<Squarer>::spawn(PoolConfig::new(2), 0).unwrap();

    let out: Vec<Result<u64, RunError>> = pool
        .run_try(stage.run(stream::iter([3u64, 4, 5])))
        .collect()
        .await;

    let errors: Vec<&RunError> = out.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(
        errors,
        vec![&RunError::Failed(Failure::new(1, JobError::fail("bad record")))]
    );
    assert!(out.last().is_some_and(Result::is_err));
}

#[test]
fn zero_pool_size_is_rejected() {
    let err = WorkerPool::<Squarer>::spawn(PoolConfig::new(0), 0).err();
    assert!(matches!(err, Some(PoolError::Config(ConfigError::ZeroPoolSize))));
}

#[test]
fn dropping_an_unused_pool_stops_its_workers() {
    let exits = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::<Counted>::spawn(PoolConfig::new(2), Arc::clone(&exits)).unwrap();
    drop(pool);

    for _ in 0..400 {
        if exits.load(Ordering::SeqCst) == 2 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(exits.load(Ordering::SeqCst), 2);
}
