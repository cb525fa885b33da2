//! # Non-blocking event fan-out to multiple subscribers.
//!
//! Provides [`SubscriberSet`], which distributes events to multiple subscribers
//! without blocking the engine that published them.
//!
//! ## Architecture
//! ```text
//! emit(event)
//!     │
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → tracing::warn!
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - `emit()` never waits; a full queue drops the event for that subscriber
//!   and the count is reported at shutdown.
//! - Each subscriber sees events in publish order.
//! - A slow or panicking subscriber does not affect the others.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::events::Event;

use super::Subscribe;

/// One subscriber's queue and the task draining it.
struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    worker: JoinHandle<()>,
    dropped: u64,
}

impl Lane {
    fn spawn(sub: Arc<dyn Subscribe>) -> Self {
        let name = sub.name();
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
        let worker = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                let delivered = std::panic::AssertUnwindSafe(sub.on_event(&ev))
                    .catch_unwind()
                    .await;
                if let Err(panic) = delivered {
                    tracing::warn!(
                        subscriber = name,
                        event = ev.kind.as_label(),
                        info = %panic_message(&*panic),
                        "subscriber panicked"
                    );
                }
            }
        });
        Self {
            name,
            tx,
            worker,
            dropped: 0,
        }
    }
}

/// Fan-out coordinator for event subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker task per subscriber.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            lanes: subs.into_iter().map(Lane::spawn).collect(),
        }
    }

    /// Queues `event` for every subscriber without waiting.
    ///
    /// A full or closed queue drops the event for that subscriber only.
    pub fn emit(&mut self, event: Event) {
        let event = Arc::new(event);
        for lane in &mut self.lanes {
            match lane.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(ev)) | Err(TrySendError::Closed(ev)) => {
                    lane.dropped += 1;
                    tracing::trace!(
                        subscriber = lane.name,
                        event = ev.kind.as_label(),
                        "event dropped for subscriber"
                    );
                }
            }
        }
    }

    /// Closes all queues and waits for the workers to drain them.
    ///
    /// Subscribers that missed events are reported once here.
    pub async fn shutdown(self) {
        for lane in self.lanes {
            let Lane {
                name,
                tx,
                worker,
                dropped,
            } = lane;
            drop(tx);
            let _ = worker.await;
            if dropped > 0 {
                tracing::warn!(subscriber = name, dropped, "subscriber missed events");
            }
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::events::EventKind;

    struct Boom;

    #[async_trait]
    impl Subscribe for Boom {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
    }

    #[derive(Default)]
    struct Kinds(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let kinds = Arc::new(Kinds::default());
        let mut set = SubscriberSet::new(vec![Arc::new(Boom), kinds.clone()]);
        assert_eq!(set.len(), 2);

        set.emit(Event::new(EventKind::JobStarted));
        set.emit(Event::new(EventKind::JobCompleted));
        set.shutdown().await;

        assert_eq!(
            *kinds.0.lock().unwrap(),
            vec![EventKind::JobStarted, EventKind::JobCompleted]
        );
    }

    #[test]
    fn panic_payloads_render_as_text() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
