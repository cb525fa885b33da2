//! # Stream stage mode.
//!
//! A [`StreamStage`] is one step of a backpressure-propagating pipeline: it
//! pulls items from an upstream [`Stream`](futures::Stream), maps them with at
//! most `concurrency` mappers in flight, and yields a [`StageStream`].
//!
//! - Backpressure: upstream is polled only while there is free capacity, so a
//!   slow stage slows everything before it.
//! - Sentinels: mappers return [`Mapped::Skip`] or [`Mapped::End`] instead of a value.
//! - Errors under `Aggregate` are delivered once, as the stream's last item,
//!   never per item.
//! - Stages chain with [`StageStream::pipe`] or [`StageExt::through`]; a
//!   terminal error from one stage passes through later stages unchanged.

mod driver;
mod mapped;
mod output;
mod stream_stage;

pub use mapped::Mapped;
pub use output::{StageExt, StageStream};
pub use stream_stage::StreamStage;

#[cfg(test)]
mod tests;
