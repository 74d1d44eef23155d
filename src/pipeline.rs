use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(doc)]
use crate::sink::FnSink;
use crate::config::PipelineConfig;
use crate::delivery_thread::{DeliverySignals, DeliveryThread};
use crate::dispatcher::Dispatcher;
use crate::error::DeliveryError;
use crate::event::Event;
use crate::event_buffer::{EventBuffer, RecordOutcome};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::sink::EventSink;
use crate::sink_registry::{SinkHandle, SinkRegistry};
use crate::{Error, Result};

/// Lifecycle state of an [`EventPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Uninitialized = 0,
    Running = 1,
    Draining = 2,
    Shutdown = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> PipelineState {
        match value {
            0 => PipelineState::Uninitialized,
            1 => PipelineState::Running,
            2 => PipelineState::Draining,
            _ => PipelineState::Shutdown,
        }
    }
}

/// Event logging pipeline: buffers recorded events and delivers them in batches to the active
/// [`EventSink`] from a background thread.
///
/// # Lifecycle
///
/// A pipeline is created `Uninitialized`. Events recorded at this point are buffered but not
/// delivered. [`EventPipeline::start`] starts the sink and the delivery thread.
/// [`EventPipeline::shutdown`] stops accepting events, flushes what's left, and shuts the sink
/// down. Dropping a pipeline shuts it down too.
///
/// # Examples
///
/// ```
/// # use eventlog_core::{Event, EventPipeline, PipelineConfig, UserFingerprint};
/// let pipeline = EventPipeline::new(PipelineConfig::new());
/// pipeline.set_sink(|payload: &str| {
///     println!("{payload}");
///     true
/// });
/// pipeline.start().expect("failed to start pipeline");
///
/// pipeline.record(Event::new("page_view", UserFingerprint::from_raw("user-1")));
///
/// pipeline.shutdown().expect("failed to flush events");
/// ```
pub struct EventPipeline {
    config: PipelineConfig,
    state: AtomicU8,
    buffer: Arc<EventBuffer>,
    registry: Arc<SinkRegistry>,
    metrics: Arc<PipelineMetrics>,
    dispatcher: Arc<Dispatcher>,
    signals: Arc<DeliverySignals>,
    delivery_thread: Mutex<Option<DeliveryThread>>,
    /// Whether shutdown tears down the sink held by `registry`. False for registries passed in
    /// by the caller, which may be shared with other pipelines.
    owns_registry: bool,
    /// Serializes `start()` and `shutdown()`.
    lifecycle: Mutex<()>,
}

impl EventPipeline {
    /// Create a new pipeline with its own, empty sink registry.
    ///
    /// The pipeline owns the registry: shutting the pipeline down shuts the active sink down.
    pub fn new(config: PipelineConfig) -> EventPipeline {
        EventPipeline::build(config, Arc::new(SinkRegistry::new()), true)
    }

    /// Create a new pipeline delivering to the sink held by `registry`.
    ///
    /// The registry may be shared with other pipelines. Shutting this pipeline down leaves the
    /// registered sink in place; whoever created the registry is responsible for shutting the
    /// sink down.
    pub fn with_registry(config: PipelineConfig, registry: Arc<SinkRegistry>) -> EventPipeline {
        EventPipeline::build(config, registry, false)
    }

    fn build(
        config: PipelineConfig,
        registry: Arc<SinkRegistry>,
        owns_registry: bool,
    ) -> EventPipeline {
        let buffer = Arc::new(EventBuffer::new(
            config.max_buffered_events,
            config.overflow_policy,
        ));
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            buffer.clone(),
            registry.clone(),
            metrics.clone(),
        ));

        EventPipeline {
            config,
            state: AtomicU8::new(PipelineState::Uninitialized as u8),
            buffer,
            registry,
            metrics,
            dispatcher,
            signals: Arc::new(DeliverySignals::default()),
            delivery_thread: Mutex::new(None),
            owns_registry,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Start the active sink and the delivery thread.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if the pipeline is running.
    /// - [`Error::AlreadyShutDown`] if the pipeline has been shut down.
    /// - [`Error::Io`] if the delivery thread failed to start.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lock_lifecycle();
        match self.state() {
            PipelineState::Uninitialized => {}
            PipelineState::Running => return Err(Error::AlreadyStarted),
            PipelineState::Draining | PipelineState::Shutdown => {
                return Err(Error::AlreadyShutDown)
            }
        }

        if let Some(sink) = self.registry.current() {
            sink.ensure_started();
        }

        let thread = DeliveryThread::start(
            self.dispatcher.clone(),
            self.signals.clone(),
            self.config.flush_interval,
        )?;
        *self
            .delivery_thread
            .lock()
            .unwrap_or_else(|err| err.into_inner()) = Some(thread);
        self.set_state(PipelineState::Running);
        log::debug!(target: "eventlog", "event pipeline started");

        if !self.buffer.is_empty() {
            // Deliver events recorded before start.
            self.signals.flush_requested.notify_one();
        }
        Ok(())
    }

    /// Register a new sink, replacing the active one.
    ///
    /// If the pipeline is running, the new sink is started before any events are routed to it.
    /// Returns the previous sink; batches already being delivered to it complete against it. The
    /// pipeline does not shut the previous sink down: call [`SinkHandle::shutdown`] if needed.
    ///
    /// A sink assembled from separate callbacks can be registered with [`FnSink`].
    pub fn set_sink(&self, sink: impl EventSink + 'static) -> Option<SinkHandle> {
        self.set_sink_handle(SinkHandle::new(sink))
    }

    pub fn set_sink_handle(&self, handle: SinkHandle) -> Option<SinkHandle> {
        if self.state() == PipelineState::Running {
            handle.ensure_started();
        }
        log::debug!(target: "eventlog", "registering new sink");
        self.registry.set_sink(handle)
    }

    /// Record an event for delivery.
    ///
    /// Never blocks on delivery. Returns `false` if the event was not accepted: the pipeline is
    /// shutting down, or the buffer is full (see
    /// [`OverflowPolicy`](crate::OverflowPolicy)).
    pub fn record(&self, event: Event) -> bool {
        match self.buffer.record(event) {
            RecordOutcome::Buffered => {
                self.metrics.record_accepted();
                true
            }
            RecordOutcome::FlushRequested => {
                self.metrics.record_accepted();
                self.signals.flush_requested.notify_one();
                true
            }
            RecordOutcome::Rejected(reason) => {
                self.metrics.record_rejected();
                log::debug!(target: "eventlog", "event rejected: {reason:?}");
                false
            }
        }
    }

    /// Ask the delivery thread to flush buffered events. Does not wait for delivery.
    ///
    /// Requests made while a flush is in flight are coalesced into a single follow-up flush.
    pub fn flush(&self) {
        self.signals.flush_requested.notify_one();
    }

    /// Stop accepting events, deliver buffered events, and shut the sink down.
    ///
    /// A rejected batch still waiting for a retry is dropped instead. If the pipeline was never
    /// started, buffered events are reported dropped with [`DeliveryError::NotStarted`]. The sink
    /// is only shut down if the pipeline owns its registry (see
    /// [`EventPipeline::with_registry`]).
    ///
    /// Waits up to [`PipelineConfig::shutdown_timeout`] for the final flush. Calling `shutdown()`
    /// more than once is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::Delivery`] with [`DeliveryError::ShutdownTimeout`] if the final flush did not
    ///   finish in time. Undelivered events are reported as dropped.
    /// - [`Error::DeliveryThreadPanicked`] if the delivery thread panicked.
    pub fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.lock_lifecycle();
        if matches!(
            self.state(),
            PipelineState::Draining | PipelineState::Shutdown
        ) {
            return Ok(());
        }

        log::debug!(target: "eventlog", "shutting down event pipeline");
        self.set_state(PipelineState::Draining);
        self.buffer.close();
        self.dispatcher.begin_shutdown();

        let thread = self
            .delivery_thread
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        let result = match thread {
            None => {
                self.drop_remaining(DeliveryError::NotStarted);
                Ok(())
            }
            Some(thread) => match thread.shutdown(self.config.shutdown_timeout) {
                Some(Ok(())) => Ok(()),
                Some(Err(err)) => {
                    self.drop_remaining(DeliveryError::Aborted);
                    Err(err)
                }
                None => {
                    log::warn!(target: "eventlog", "final flush did not finish within {:?}", self.config.shutdown_timeout);
                    let pending = self.buffer.discard();
                    let err = DeliveryError::ShutdownTimeout { pending };
                    if pending > 0 {
                        self.dispatcher.report_drop(&err, pending);
                    }
                    Err(err.into())
                }
            },
        };

        if self.owns_registry {
            if let Some(sink) = self.registry.take() {
                sink.shutdown();
            }
        }
        self.set_state(PipelineState::Shutdown);
        log::debug!(target: "eventlog", "event pipeline shut down");

        result
    }

    fn drop_remaining(&self, reason: DeliveryError) {
        let remaining = self.buffer.discard();
        if remaining > 0 {
            self.dispatcher.report_drop(&reason, remaining);
        }
    }

    pub fn registry(&self) -> &Arc<SinkRegistry> {
        &self.registry
    }

    /// Number of events waiting for the next flush.
    pub fn buffered_events(&self) -> usize {
        self.buffer.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!(target: "eventlog", "error shutting down event pipeline on drop: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::OverflowPolicy;
    use crate::fingerprint::UserFingerprint;
    use crate::test_sink::RecordingSink;

    fn config() -> PipelineConfig {
        let _ = env_logger::builder().is_test(true).try_init();

        PipelineConfig::new()
            // Long enough to never fire unless a test wants it to.
            .with_flush_interval(Duration::from_secs(3600))
            .with_retry_interval(Duration::from_millis(1))
            .with_max_retry_delay(Duration::from_millis(5))
            .with_retry_jitter(Duration::ZERO)
            .with_shutdown_timeout(Duration::from_secs(5))
    }

    fn event(name: &str) -> Event {
        Event::new(name, UserFingerprint::from_raw("user"))
    }

    fn recording_drops(drops: &Arc<Mutex<Vec<(DeliveryError, usize)>>>) -> PipelineConfig {
        let drops = drops.clone();
        config().with_drop_observer(move |reason: &DeliveryError, events: usize| {
            drops.lock().unwrap().push((reason.clone(), events));
        })
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn manual_flush_delivers_events_in_order() {
        let pipeline = EventPipeline::new(config());
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();

        for name in ["a", "b", "c"] {
            assert!(pipeline.record(event(name)));
        }
        pipeline.flush();

        wait_for("delivery", || sink.attempts() == 1);
        assert_eq!(sink.event_names(), ["a", "b", "c"]);
        assert_eq!(pipeline.buffered_events(), 0);
        assert_eq!(pipeline.metrics().events_delivered, 3);
    }

    #[test]
    fn timer_flushes_periodically() {
        let pipeline =
            EventPipeline::new(config().with_flush_interval(Duration::from_millis(20)));
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();

        pipeline.record(event("a"));
        wait_for("first flush", || sink.event_names().len() == 1);
        pipeline.record(event("b"));
        wait_for("second flush", || sink.event_names().len() == 2);

        assert_eq!(sink.event_names(), ["a", "b"]);
    }

    #[test]
    fn reaching_capacity_triggers_flush() {
        let pipeline = EventPipeline::new(config().with_max_buffered_events(2));
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();

        pipeline.record(event("a"));
        pipeline.record(event("b"));

        wait_for("capacity flush", || sink.attempts() == 1);
        assert_eq!(sink.event_names(), ["a", "b"]);
    }

    #[test]
    fn full_buffer_with_flush_in_flight_rejects_without_blocking() {
        let pipeline = EventPipeline::new(config().with_max_buffered_events(1));
        let sink = RecordingSink::accepting().blocking();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();

        assert!(pipeline.record(event("a")));
        sink.wait_until_called();
        // Buffer was drained into the blocked flush, so there's room for one more.
        assert!(pipeline.record(event("b")));

        let started = Instant::now();
        assert!(!pipeline.record(event("c")));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pipeline.metrics().events_rejected, 1);

        sink.unblock();
        wait_for("pending flush", || sink.event_names().len() == 2);
        assert_eq!(sink.event_names(), ["a", "b"]);
    }

    #[test]
    fn drop_newest_policy_rejects_overflow() {
        let pipeline = EventPipeline::new(
            config()
                .with_max_buffered_events(1)
                .with_overflow_policy(OverflowPolicy::DropNewest),
        );

        assert!(pipeline.record(event("a")));
        assert!(!pipeline.record(event("b")));
        assert_eq!(pipeline.buffered_events(), 1);
    }

    #[test]
    fn events_recorded_before_start_are_delivered_after_start() {
        let pipeline = EventPipeline::new(config());
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());

        pipeline.record(event("early"));
        assert_eq!(sink.attempts(), 0);
        pipeline.start().unwrap();

        wait_for("delivery", || sink.attempts() == 1);
        assert_eq!(sink.log(), ["start", "log_events"]);
    }

    #[test]
    fn shutdown_flushes_once_then_shuts_sink_down() {
        let pipeline = EventPipeline::new(config());
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();
        pipeline.record(event("last"));

        pipeline.shutdown().unwrap();

        assert_eq!(sink.log(), ["start", "log_events", "shutdown"]);
        assert_eq!(sink.event_names(), ["last"]);
        assert_eq!(pipeline.state(), PipelineState::Shutdown);
        assert!(pipeline.registry().current().is_none());
    }

    #[test]
    fn shutdown_makes_single_attempt_against_rejecting_sink() {
        let pipeline = EventPipeline::new(config().with_max_delivery_attempts(5));
        let sink = RecordingSink::rejecting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();
        pipeline.record(event("last"));

        pipeline.shutdown().unwrap();

        assert_eq!(sink.log(), ["start", "log_events", "shutdown"]);
        assert_eq!(pipeline.metrics().events_dropped, 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pipeline = EventPipeline::new(config());
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();

        pipeline.shutdown().unwrap();
        let started = Instant::now();
        pipeline.shutdown().unwrap();

        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(sink.shutdowns(), 1);
    }

    #[test]
    fn record_after_shutdown_is_rejected() {
        let pipeline = EventPipeline::new(config());
        pipeline.start().unwrap();
        pipeline.shutdown().unwrap();

        assert!(!pipeline.record(event("late")));
    }

    #[test]
    fn start_errors() {
        let pipeline = EventPipeline::new(config());
        pipeline.start().unwrap();

        assert!(matches!(pipeline.start(), Err(Error::AlreadyStarted)));
        pipeline.shutdown().unwrap();
        assert!(matches!(pipeline.start(), Err(Error::AlreadyShutDown)));
    }

    #[test]
    fn shutdown_timeout_reports_pending_events() {
        let drops = Arc::new(Mutex::new(Vec::new()));
        let pipeline = EventPipeline::new(
            recording_drops(&drops).with_shutdown_timeout(Duration::from_millis(50)),
        );
        let sink = RecordingSink::accepting().blocking();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();
        pipeline.record(event("stuck"));
        pipeline.flush();
        sink.wait_until_called();

        let result = pipeline.shutdown();

        assert!(matches!(
            result,
            Err(Error::Delivery(DeliveryError::ShutdownTimeout { pending: 1 }))
        ));
        assert_eq!(
            *drops.lock().unwrap(),
            [(DeliveryError::ShutdownTimeout { pending: 1 }, 1)]
        );
        assert_eq!(sink.shutdowns(), 1);
        assert_eq!(pipeline.state(), PipelineState::Shutdown);

        // The abandoned delivery finishing later is not double-counted.
        sink.unblock();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pipeline.metrics().events_delivered, 0);
    }

    #[test]
    fn shutdown_without_start_reports_buffered_events() {
        let drops = Arc::new(Mutex::new(Vec::new()));
        let pipeline = EventPipeline::new(recording_drops(&drops));
        let sink = RecordingSink::accepting();
        pipeline.set_sink(sink.clone());
        pipeline.record(event("never"));

        pipeline.shutdown().unwrap();

        assert_eq!(*drops.lock().unwrap(), [(DeliveryError::NotStarted, 1)]);
        // Never started, never called, but still torn down.
        assert_eq!(sink.log(), ["shutdown"]);
        assert_eq!(pipeline.state(), PipelineState::Shutdown);
    }

    #[test]
    fn shutdown_does_not_wait_out_retry_backoff() {
        let pipeline = EventPipeline::new(
            config()
                .with_max_delivery_attempts(5)
                .with_retry_interval(Duration::from_secs(60))
                .with_max_retry_delay(Duration::from_secs(60)),
        );
        let sink = RecordingSink::rejecting();
        pipeline.set_sink(sink.clone());
        pipeline.start().unwrap();
        pipeline.record(event("a"));
        pipeline.flush();
        wait_for("first attempt", || sink.attempts() == 1);

        let started = Instant::now();
        pipeline.shutdown().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.log(), ["start", "log_events", "shutdown"]);
        assert_eq!(pipeline.metrics().events_dropped, 1);
    }

    #[test]
    fn drop_observer_from_config_sees_delivery_thread_drops() {
        let drops = Arc::new(Mutex::new(Vec::new()));
        let pipeline = EventPipeline::new(recording_drops(&drops).with_max_delivery_attempts(1));
        pipeline.set_sink(RecordingSink::rejecting());
        pipeline.start().unwrap();

        pipeline.record(event("a"));
        pipeline.flush();

        wait_for("drop report", || !drops.lock().unwrap().is_empty());
        assert_eq!(
            *drops.lock().unwrap(),
            [(DeliveryError::SinkRejected { attempts: 1 }, 1)]
        );
    }

    #[test]
    fn swapped_sink_is_started_and_receives_pending_events() {
        let pipeline = EventPipeline::new(config());
        let old = RecordingSink::accepting();
        let new = RecordingSink::accepting();
        pipeline.set_sink(old.clone());
        pipeline.start().unwrap();
        pipeline.record(event("a"));

        let previous = pipeline.set_sink(new.clone());
        assert_eq!(new.starts(), 1);
        pipeline.flush();
        wait_for("delivery", || new.attempts() == 1);

        assert_eq!(new.event_names(), ["a"]);
        assert_eq!(old.attempts(), 0);
        // Previous sink is handed back, not shut down.
        assert!(previous.is_some());
        assert_eq!(old.shutdowns(), 0);
    }

    #[test]
    fn pipelines_can_share_a_registry() {
        let registry = Arc::new(SinkRegistry::new());
        let sink = RecordingSink::accepting();
        registry.set_sink(SinkHandle::new(sink.clone()));

        let first = EventPipeline::with_registry(config(), registry.clone());
        let second = EventPipeline::with_registry(config(), registry.clone());
        first.start().unwrap();
        second.start().unwrap();
        first.record(event("first"));
        second.record(event("second"));
        first.flush();
        second.flush();

        wait_for("both deliveries", || sink.attempts() == 2);
        assert_eq!(sink.starts(), 1);
        assert_eq!(sink.payloads().len(), 2);

        // The registry isn't owned by either pipeline: the sink outlives both.
        first.shutdown().unwrap();
        assert!(registry.current().is_some());
        second.record(event("after"));
        second.flush();
        wait_for("delivery after first shutdown", || {
            second.metrics().events_delivered == 2
        });
        assert_eq!(second.metrics().sink_unavailable, 0);

        second.shutdown().unwrap();
        assert_eq!(sink.shutdowns(), 0);
        assert!(registry.current().is_some());
    }

    #[test]
    fn dropping_pipeline_flushes() {
        let sink = RecordingSink::accepting();
        {
            let pipeline = EventPipeline::new(config());
            pipeline.set_sink(sink.clone());
            pipeline.start().unwrap();
            pipeline.record(event("a"));
        }

        assert_eq!(sink.log(), ["start", "log_events", "shutdown"]);
    }
}
