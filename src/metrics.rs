//! Pipeline counters.
//!
//! All counters use relaxed ordering: they are eventually consistent and intended for
//! observability, not for synchronization.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::DeliveryError;

/// Atomic counters describing what happened to recorded events.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Events accepted into the buffer
    events_recorded: AtomicU64,
    /// Events refused by `record` (closed, backpressure, overflow)
    events_rejected: AtomicU64,
    /// Flushes that drained a non-empty batch
    flushes: AtomicU64,
    /// Calls to `log_events`
    delivery_attempts: AtomicU64,
    batches_delivered: AtomicU64,
    events_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    events_dropped: AtomicU64,
    encode_failures: AtomicU64,
    /// Individual `log_events` calls that returned false or panicked
    sink_rejections: AtomicU64,
    sink_unavailable: AtomicU64,
    shutdown_timeouts: AtomicU64,
}

impl PipelineMetrics {
    pub const fn new() -> Self {
        Self {
            events_recorded: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            delivery_attempts: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            sink_rejections: AtomicU64::new(0),
            sink_unavailable: AtomicU64::new(0),
            shutdown_timeouts: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_accepted(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_attempt(&self, accepted: bool) {
        self.delivery_attempts.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.sink_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_delivered(&self, event_count: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered
            .fetch_add(event_count as u64, Ordering::Relaxed);
    }

    /// Count a dropped batch, attributing it to the reason-specific counter.
    pub(crate) fn record_dropped(&self, reason: &DeliveryError, event_count: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.events_dropped
            .fetch_add(event_count as u64, Ordering::Relaxed);
        let counter = match reason {
            DeliveryError::Encode(_) => &self.encode_failures,
            DeliveryError::SinkUnavailable => &self.sink_unavailable,
            DeliveryError::ShutdownTimeout { .. } => &self.shutdown_timeouts,
            // Rejections are counted per attempt.
            DeliveryError::SinkRejected { .. }
            | DeliveryError::NotStarted
            | DeliveryError::Aborted => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            delivery_attempts: self.delivery_attempts.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            sink_rejections: self.sink_rejections.load(Ordering::Relaxed),
            sink_unavailable: self.sink_unavailable.load(Ordering::Relaxed),
            shutdown_timeouts: self.shutdown_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub events_recorded: u64,
    pub events_rejected: u64,
    pub flushes: u64,
    pub delivery_attempts: u64,
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub batches_dropped: u64,
    pub events_dropped: u64,
    pub encode_failures: u64,
    pub sink_rejections: u64,
    pub sink_unavailable: u64,
    pub shutdown_timeouts: u64,
}
