//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait (the engines' injectable logger)
//! and the built-in [`LogWriter`], which renders events through `tracing`.
//!
//! ## Architecture
//! ```text
//! engine ── publish(Event) ──► Bus ──► listener ──► SubscriberSet ──┬──► LogWriter
//!                                                                   ├──► Metrics
//!                                                                   └──► Custom ...
//! ```
//!
//! The listener is spawned by the engine builders when at least one subscriber
//! is configured; it ends once the engine (the last bus sender) is gone, after
//! which each subscriber drains its queue and stops.

mod log;
mod set;
mod subscriber;

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::events::Bus;

pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;

/// Subscribes to `bus` and forwards events to `subs` (fire-and-forget).
///
/// No-op when `subs` is empty. Must be called from within a tokio runtime.
pub(crate) fn attach(bus: &Bus, subs: Vec<Arc<dyn Subscribe>>) {
    if subs.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let mut set = SubscriberSet::new(subs);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(ev),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "subscriber listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}
