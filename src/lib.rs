//! `eventlog_core` buffers events recorded by a feature-flagging / experimentation SDK and
//! delivers them in batches to a pluggable sink.
//!
//! # Overview
//!
//! [`EventPipeline`] is the entry point. Application code calls [`EventPipeline::record`] on the
//! hot evaluation path; the call only touches an in-memory buffer and never waits for delivery.
//!
//! [`EventBuffer`](event_buffer::EventBuffer) holds recorded events up to a configured capacity.
//! When the buffer fills up, the [`OverflowPolicy`] decides whether to force a flush or to drop
//! the new event. A full buffer with a flush already in flight rejects new events
//! (backpressure).
//!
//! [`Dispatcher`](dispatcher::Dispatcher) drains the buffer, encodes the batch into a single
//! JSON payload with [`encode_batch`](encoder::encode_batch), and hands it to the active sink,
//! retrying rejected batches a bounded number of times. Flushes run on a dedicated delivery
//! thread, on a timer, when the buffer reaches capacity, on demand, and once more on shutdown.
//!
//! [`SinkRegistry`](sink_registry::SinkRegistry) holds the active [`EventSink`]. A sink can be
//! replaced at any time; deliveries already in flight complete against the sink they started
//! with.
//!
//! # Error handling
//!
//! Logging failures never crash or block the host application. Batches that cannot be delivered
//! are dropped and reported as a [`DeliveryError`]: logged, counted in [`PipelineMetrics`], and
//! passed to the optional [`DropObserver`].
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `eventlog` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into
//! pipeline operations.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod dispatcher;
pub mod encoder;
pub mod event_buffer;
pub mod sink_registry;

mod config;
mod delivery_thread;
mod error;
mod event;
mod fingerprint;
mod metrics;
mod observer;
mod pipeline;
mod sink;
#[cfg(test)]
mod test_sink;

pub use config::{OverflowPolicy, PipelineConfig, SdkMetadata};
pub use error::{DeliveryError, Error, Result};
pub use event::{Batch, Event, EventValue};
pub use fingerprint::{UserAttribute, UserFingerprint};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use observer::DropObserver;
pub use pipeline::{EventPipeline, PipelineState};
pub use sink::{EventSink, FnSink};
