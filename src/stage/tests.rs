use std::future::ready;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    Config, ErrorPolicy, Event, EventKind, Failure, JobError, Mapped, RunError, RunStats, StageExt,
    StreamStage, Subscribe,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn stats_channel() -> (oneshot::Receiver<RunStats>, impl FnOnce(&RunStats) + Send + 'static) {
    let (tx, rx) = oneshot::channel();
    (rx, move |stats: &RunStats| {
        let _ = tx.send(stats.clone());
    })
}

#[derive(Default)]
struct Recorder(Mutex<Vec<EventKind>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, ev: &Event) {
        self.0.lock().unwrap().push(ev.kind);
    }
}

/// Four items; `failing` indices fail; item `i` takes `40 - 10 * i` ms.
fn four_items(policy: ErrorPolicy, failing: &'static [u64]) -> StreamStage<u64, u64> {
    StreamStage::new(
        Config::new(4).with_error_policy(policy),
        move |x: u64, i| async move {
            sleep(ms(40 - 10 * i)).await;
            if failing.contains(&i) {
                Err(JobError::fail(format!("item {i} failed")))
            } else {
                Ok(Mapped::Value(x))
            }
        },
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn concurrency_one_preserves_input_order() {
    let stage = StreamStage::new(Config::new(1), |x: u64, _| async move {
        sleep(ms(10 + (x * 7) % 13)).await;
        Ok(Mapped::Value(x))
    })
    .unwrap();

    let out: Vec<u64> = stage
        .run(stream::iter(0..10u64))
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(out, (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn higher_concurrency_emits_in_completion_order() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&completed);
    let stage = StreamStage::new(Config::new(5), move |x: u64, i| {
        let log = Arc::clone(&log);
        async move {
            sleep(ms(100 - 20 * i)).await;
            log.lock().unwrap().push(x);
            Ok(Mapped::Value(x))
        }
    })
    .unwrap();

    let out: Vec<u64> = stage
        .run(stream::iter(0..5u64))
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_ne!(out, vec![0, 1, 2, 3, 4]);
    assert_eq!(out, *completed.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn skip_sentinel_drops_items() {
    let (stats, on_done) = stats_channel();
    let stage = StreamStage::new(Config::new(2), |x: u32, _| async move {
        Ok(if x % 2 == 0 { Mapped::Skip } else { Mapped::Value(x) })
    })
    .unwrap()
    .on_done(on_done);

    let out: Vec<u32> = stage
        .run(stream::iter([1, 2, 3, 4]))
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(out, vec![1, 3]);

    let stats = stats.await.unwrap();
    assert_eq!(stats.count_skipped, 2);
    assert!(stats.ok);
    assert!(stats.is_balanced());
}

#[tokio::test(start_paused = true)]
async fn end_sentinel_stops_reading_upstream() {
    let recorder = Arc::new(Recorder::default());
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let (stats, on_done) = stats_channel();

    let stage = StreamStage::new(Config::new(5), |x: u32, i| async move {
        Ok(if i == 2 { Mapped::End } else { Mapped::Value(x) })
    })
    .unwrap()
    .on_done(on_done)
    .with_subscribers(vec![recorder.clone()]);
    let token = stage.cancellation();

    let upstream = stream::iter(1..=9u32).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let out: Vec<u32> = stage.run(upstream).map(|r| r.unwrap()).collect().await;

    assert_eq!(out, vec![1, 2]);
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
    assert!(token.is_cancelled());

    let stats = stats.await.unwrap();
    assert_eq!((stats.count_in, stats.count_out, stats.count_skipped), (3, 2, 1));

    sleep(ms(1)).await;
    let kinds = recorder.0.lock().unwrap().clone();
    assert!(kinds.contains(&EventKind::EndRequested));
    assert!(!kinds.contains(&EventKind::CancelObserved));
}

#[tokio::test(start_paused = true)]
async fn fail_fast_emits_first_error_and_admits_nothing_after() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&started);
    let stage = StreamStage::new(Config::new(1), move |x: u32, i| {
        log.lock().unwrap().push(i);
        async move {
            sleep(ms(5)).await;
            if i == 2 {
                Err(JobError::fail("item 3 failed"))
            } else {
                Ok(Mapped::Value(x))
            }
        }
    })
    .unwrap();

    let out: Vec<Result<u32, RunError>> = stage.run(stream::iter([1, 2, 3, 4])).collect().await;

    assert_eq!(
        out,
        vec![
            Ok(1),
            Ok(2),
            Err(RunError::Failed(Failure::new(2, JobError::fail("item 3 failed")))),
        ]
    );
    assert_eq!(*started.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn aggregate_delivers_one_combined_failure_after_on_done() {
    let done = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&done);
    let stage = four_items(ErrorPolicy::Aggregate, &[1, 3]).on_done(move |stats| {
        assert_eq!(stats.errors.len(), 2);
        flag.fetch_add(1, Ordering::SeqCst);
    });

    let mut output = stage.run(stream::iter(0..4u64));
    let mut values = Vec::new();
    let mut failure = None;
    while let Some(item) = output.next().await {
        match item {
            Ok(v) => values.push(v),
            Err(err) => {
                assert_eq!(done.load(Ordering::SeqCst), 1);
                failure = Some(err);
            }
        }
    }

    assert_eq!(values, vec![2, 0]);
    let failure = failure.unwrap();
    let order: Vec<u64> = failure.failures().iter().map(|f| f.index).collect();
    assert_eq!(order, vec![3, 1]);
    assert!(matches!(failure, RunError::Aggregate { .. }));
}

#[tokio::test(start_paused = true)]
async fn suppress_counts_errors_and_never_raises() {
    let (stats, on_done) = stats_channel();
    let stage = four_items(ErrorPolicy::Suppress, &[1, 3]).on_done(on_done);

    let out: Vec<Result<u64, RunError>> = stage.run(stream::iter(0..4u64)).collect().await;
    assert_eq!(out, vec![Ok(2), Ok(0)]);

    let stats = stats.await.unwrap();
    assert_eq!(stats.count_errors, 2);
    assert!(!stats.ok);
    assert!(stats.errors.is_empty());
    assert!(stats.is_balanced());
}

fn explode() -> Result<Mapped<u32>, JobError> {
    panic!("late boom")
}

#[tokio::test(start_paused = true)]
async fn sync_and_async_failures_are_equivalent() {
    let stage = StreamStage::new(
        Config::new(4).with_error_policy(ErrorPolicy::Aggregate),
        |_x: u32, i| -> BoxFuture<'static, Result<Mapped<u32>, JobError>> {
            match i {
                0 => ready(Err(JobError::fail("sync"))).boxed(),
                1 => async {
                    sleep(ms(5)).await;
                    Err(JobError::fail("async"))
                }
                .boxed(),
                2 => panic!("boom"),
                _ => async {
                    sleep(ms(5)).await;
                    explode()
                }
                .boxed(),
            }
        },
    )
    .unwrap();

    let out: Vec<Result<u32, RunError>> = stage.run(stream::iter(0..4u32)).collect().await;
    assert_eq!(out.len(), 1);
    let err = out.into_iter().next().unwrap().unwrap_err();

    let mut failures = err.failures().to_vec();
    failures.sort_by_key(|f| f.index);
    let errors: Vec<JobError> = failures.into_iter().map(|f| f.error).collect();
    assert_eq!(
        errors,
        vec![
            JobError::fail("sync"),
            JobError::fail("async"),
            JobError::Panicked { info: "boom".into() },
            JobError::Panicked { info: "late boom".into() },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn predicates_filter_values() {
    let (stats, on_done) = stats_channel();
    let sync = StreamStage::new(Config::new(3), |x: u32, _| async move { Ok(Mapped::Value(x * 10)) })
        .unwrap()
        .filter(|v| v % 20 == 0)
        .on_done(on_done);
    let mut out: Vec<u32> = sync.run(stream::iter(1..=6)).map(|r| r.unwrap()).collect().await;
    out.sort_unstable();
    assert_eq!(out, vec![20, 40, 60]);
    assert_eq!(stats.await.unwrap().count_skipped, 3);

    let async_filter = StreamStage::new(Config::new(3), |x: u32, _| async move { Ok(Mapped::Value(x)) })
        .unwrap()
        .filter_async(|v| {
            let v = *v;
            async move {
                sleep(ms(1)).await;
                v > 4
            }
        });
    let mut out: Vec<u32> = async_filter
        .run(stream::iter(1..=6))
        .map(|r| r.unwrap())
        .collect()
        .await;
    out.sort_unstable();
    assert_eq!(out, vec![5, 6]);
}

#[tokio::test(start_paused = true)]
async fn warmup_limits_early_concurrency() {
    let t0 = Instant::now();
    let current = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (Arc::clone(&current), Arc::clone(&starts));

    let stage = StreamStage::new(Config::new(8).with_warmup_secs(0.1), move |x: u32, _| {
        let (current, starts) = (Arc::clone(&c), Arc::clone(&s));
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            starts.lock().unwrap().push((t0.elapsed(), now));
            sleep(ms(15)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(Mapped::Value(x))
        }
    })
    .unwrap();

    let n = stage.run(stream::iter(0..30u32)).count().await;
    assert_eq!(n, 30);

    let starts = starts.lock().unwrap();
    let early = starts.iter().filter(|(at, _)| *at < ms(50)).map(|(_, n)| *n).max();
    let overall = starts.iter().map(|(_, n)| *n).max();
    assert!(early.unwrap_or(0) <= 2);
    assert!(overall.unwrap_or(0) >= 4);
}

#[tokio::test(start_paused = true)]
async fn stages_chain_and_pass_errors_through() {
    let plus_one = StreamStage::new(Config::new(1), |x: u32, _| async move { Ok(Mapped::Value(x + 1)) }).unwrap();
    let double = StreamStage::new(Config::new(1), |x: u32, _| async move { Ok(Mapped::Value(x * 2)) }).unwrap();
    let out: Vec<u32> = stream::iter([1, 2, 3])
        .through(plus_one)
        .pipe(double)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(out, vec![4, 6, 8]);

    let (stats, on_done) = stats_channel();
    let failing = StreamStage::new(Config::new(1), |x: u32, i| async move {
        if i == 1 {
            Err(JobError::fail("bad input"))
        } else {
            Ok(Mapped::Value(x + 1))
        }
    })
    .unwrap();
    let double = StreamStage::new(Config::new(1), |x: u32, _| async move { Ok(Mapped::Value(x * 2)) })
        .unwrap()
        .on_done(on_done);
    let out: Vec<Result<u32, RunError>> = failing.run(stream::iter([1, 2, 3])).pipe(double).collect().await;

    assert_eq!(
        out,
        vec![
            Ok(4),
            Err(RunError::Failed(Failure::new(1, JobError::fail("bad input")))),
        ]
    );
    let stats = stats.await.unwrap();
    assert!(!stats.ok);
    assert_eq!(stats.count_in, 1);
    assert!(stats.is_balanced());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_output_stops_admission() {
    let (stats, on_done) = stats_channel();
    let stage = StreamStage::new(Config::new(2), |x: u32, _| async move {
        sleep(ms(10)).await;
        Ok(Mapped::Value(x))
    })
    .unwrap()
    .on_done(on_done);

    let first: Vec<u32> = stage
        .run(stream::iter(0..100u32))
        .take(3)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(first.len(), 3);

    let stats = stats.await.unwrap();
    assert!(stats.count_in < 100);
    assert!(stats.count_out >= 3);
    assert!(stats.is_balanced());
}

#[tokio::test(start_paused = true)]
async fn external_cancellation_drains_in_flight() {
    let token = CancellationToken::new();
    let (stats, on_done) = stats_channel();
    let stage = StreamStage::new(Config::new(2), |x: u32, _| async move {
        sleep(ms(10)).await;
        Ok(Mapped::Value(x))
    })
    .unwrap()
    .with_cancellation(token.clone())
    .on_done(on_done);

    let canceller = token.clone();
    tokio::spawn(async move {
        sleep(ms(25)).await;
        canceller.cancel();
    });

    let out: Vec<Result<u32, RunError>> = stage.run(stream::iter(0..100u32)).collect().await;
    assert!(out.iter().all(Result::is_ok));
    assert_eq!(out.len(), 6);

    let stats = stats.await.unwrap();
    assert_eq!(stats.count_in, 6);
    assert!(stats.ok);
    assert!(stats.is_balanced());
}

#[tokio::test(start_paused = true)]
async fn upstream_is_not_pulled_before_first_poll() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let stage = StreamStage::new(Config::new(4), |x: u32, _| async move { Ok(Mapped::Value(x)) }).unwrap();

    let mut output = stage.run(stream::iter(0..4u32).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    sleep(ms(10)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), 0);

    assert_eq!(output.next().await, Some(Ok(0)));
    assert!(pulled.load(Ordering::SeqCst) >= 1);
}
