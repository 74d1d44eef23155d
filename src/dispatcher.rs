//! Flush lifecycle: drain the buffer, encode the batch, and hand it to the active sink with
//! bounded retries.
use std::sync::Arc;
use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::sync::watch;

use crate::config::PipelineConfig;
use crate::encoder::encode_batch;
use crate::error::DeliveryError;
use crate::event_buffer::EventBuffer;
use crate::metrics::PipelineMetrics;
use crate::observer::DropObserver;
use crate::sink_registry::SinkRegistry;

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Periodic flush interval elapsed.
    Timer,
    /// The buffer reached capacity.
    CapacityExceeded,
    /// Requested through [`EventPipeline::flush`](crate::EventPipeline::flush).
    Manual,
    /// Final drain. Only a single delivery attempt is made.
    Shutdown,
}

/// Terminal result of [`Dispatcher::flush`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was buffered. The encoder and the sink were not called.
    Empty,
    /// Another flush was already running; this one did nothing.
    Coalesced,
    Delivered { events: usize, attempts: u32 },
    Dropped { events: usize, reason: DeliveryError },
}

/// Drives delivery of buffered events to the sink registered in [`SinkRegistry`].
///
/// Only one flush runs at a time; concurrent triggers coalesce.
pub struct Dispatcher {
    config: PipelineConfig,
    buffer: Arc<EventBuffer>,
    registry: Arc<SinkRegistry>,
    metrics: Arc<PipelineMetrics>,
    flush_lock: tokio::sync::Mutex<()>,
    /// Flips to `true` once the pipeline starts shutting down. Wakes flushes sleeping between
    /// retries.
    closing: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        config: PipelineConfig,
        buffer: Arc<EventBuffer>,
        registry: Arc<SinkRegistry>,
        metrics: Arc<PipelineMetrics>,
    ) -> Dispatcher {
        Dispatcher {
            config,
            buffer,
            registry,
            metrics,
            flush_lock: tokio::sync::Mutex::new(()),
            closing: watch::channel(false).0,
        }
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Stop retrying rejected batches. A flush in progress finishes its current attempt and
    /// drops the batch if the sink rejects it.
    pub fn begin_shutdown(&self) {
        self.closing.send_replace(true);
    }

    fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Drain the buffer and deliver its contents.
    ///
    /// The flush goes through `Draining -> Encoding -> Sending -> {Delivered | Dropped}`. Dropped
    /// batches are logged, counted, and reported to the [`DropObserver`].
    pub async fn flush(&self, trigger: FlushTrigger) -> FlushOutcome {
        let Ok(_guard) = self.flush_lock.try_lock() else {
            log::debug!(target: "eventlog", "flush already in flight, coalescing {trigger:?} trigger");
            return FlushOutcome::Coalesced;
        };

        self.buffer.begin_flush();
        let outcome = self.flush_locked(trigger).await;
        self.buffer.end_flush();
        outcome
    }

    async fn flush_locked(&self, trigger: FlushTrigger) -> FlushOutcome {
        let batch = self.buffer.drain_for_flush();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let events = batch.len();
        self.metrics.record_flush();
        log::debug!(target: "eventlog", "flushing {events} event(s), trigger: {trigger:?}");

        let payload = match encode_batch(&batch, &self.config.sdk_metadata) {
            Ok(payload) => payload,
            Err(err) => return self.finish_dropped(events, err.into()),
        };
        drop(batch);

        // Captured once: retries go to the same sink even if it's replaced meanwhile.
        let Some(sink) = self.registry.current() else {
            return self.finish_dropped(events, DeliveryError::SinkUnavailable);
        };
        sink.ensure_started();

        let max_attempts = match trigger {
            FlushTrigger::Shutdown => 1,
            _ => self.config.max_delivery_attempts.max(1),
        };

        let mut attempts = 0;
        loop {
            if !self.buffer.has_in_flight() {
                // Discarded by a timed-out shutdown, which already reported it.
                return FlushOutcome::Dropped {
                    events,
                    reason: DeliveryError::ShutdownTimeout { pending: events },
                };
            }

            attempts += 1;
            let accepted = sink.log_events(&payload);
            self.metrics.record_attempt(accepted);

            if accepted {
                if self.buffer.complete_in_flight() {
                    self.metrics.record_delivered(events);
                    log::debug!(target: "eventlog", "delivered {events} event(s) after {attempts} attempt(s)");
                }
                return FlushOutcome::Delivered { events, attempts };
            }

            if attempts >= max_attempts || self.is_closing() {
                return self.finish_dropped(events, DeliveryError::SinkRejected { attempts });
            }

            let delay = self.config.retry_delay(attempts);
            log::debug!(target: "eventlog", "sink rejected batch (attempt {attempts}/{max_attempts}), retrying in {delay:?}");
            let mut closing = self.closing.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = closing.wait_for(|closing| *closing) => {}
            }

            if self.is_closing() {
                log::debug!(target: "eventlog", "shutting down, not retrying rejected batch");
                return self.finish_dropped(events, DeliveryError::SinkRejected { attempts });
            }
        }
    }

    fn finish_dropped(&self, events: usize, reason: DeliveryError) -> FlushOutcome {
        if self.buffer.complete_in_flight() {
            self.report_drop(&reason, events);
        }
        FlushOutcome::Dropped { events, reason }
    }

    pub(crate) fn report_drop(&self, reason: &DeliveryError, events: usize) {
        log::warn!(target: "eventlog", "dropping {events} event(s): {reason}");
        self.metrics.record_dropped(reason, events);
        self.config.drop_observer.on_drop(reason, events);
    }
}

/// Apply randomized `jitter` to `interval`.
pub(crate) fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
