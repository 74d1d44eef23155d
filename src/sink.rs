/// A destination for batched event payloads.
///
/// Only one sink is active at a time. It is registered with
/// [`EventPipeline::set_sink`](crate::EventPipeline::set_sink) and can be replaced while the
/// pipeline is running.
///
/// # Examples
///
/// ```no_run
/// # use eventlog_core::EventSink;
/// struct StdoutSink;
///
/// impl EventSink for StdoutSink {
///     fn log_events(&self, payload: &str) -> bool {
///         println!("{payload}");
///         true
///     }
/// }
/// ```
///
/// Any `Fn(&str) -> bool` closure is a sink too:
///
/// ```
/// # use eventlog_core::{EventPipeline, PipelineConfig};
/// let pipeline = EventPipeline::new(PipelineConfig::new());
/// pipeline.set_sink(|payload: &str| {
///     println!("{payload}");
///     true
/// });
/// ```
///
/// # Errors
///
/// Methods should not panic. A panic in [`EventSink::log_events`] is caught and treated as a
/// rejected batch; a panic in `start` or `shutdown` is caught and logged.
pub trait EventSink: Send + Sync {
    /// Warm-up hook. Called exactly once per activation, before the first `log_events` call.
    fn start(&self) {}

    /// Deliver a single serialized batch.
    ///
    /// Returns `true` if the sink accepted responsibility for the batch. `false` means delivery
    /// failed; the batch may be retried.
    ///
    /// This is called from the delivery thread, so it may block without stalling callers of
    /// [`EventPipeline::record`](crate::EventPipeline::record).
    fn log_events(&self, payload: &str) -> bool;

    /// Teardown hook. Called at most once, after the last delivery attempt.
    fn shutdown(&self) {}
}

impl<T: Fn(&str) -> bool + Send + Sync> EventSink for T {
    fn log_events(&self, payload: &str) -> bool {
        self(payload)
    }
}

type StartFn = Box<dyn Fn() + Send + Sync>;
type LogEventsFn = Box<dyn Fn(&str) -> bool + Send + Sync>;
type ShutdownFn = Box<dyn Fn() + Send + Sync>;

/// A sink assembled from three callbacks.
///
/// Useful for adapters that receive the lifecycle hooks as separate functions (e.g., from another
/// language runtime).
///
/// ```
/// # use eventlog_core::{EventSink, FnSink};
/// let sink = FnSink::new(|payload| !payload.is_empty())
///     .on_start(|| println!("sink started"))
///     .on_shutdown(|| println!("sink stopped"));
/// assert!(sink.log_events("{}"));
/// ```
pub struct FnSink {
    start: Option<StartFn>,
    log_events: LogEventsFn,
    shutdown: Option<ShutdownFn>,
}

impl FnSink {
    pub fn new(log_events: impl Fn(&str) -> bool + Send + Sync + 'static) -> FnSink {
        FnSink {
            start: None,
            log_events: Box::new(log_events),
            shutdown: None,
        }
    }

    pub fn on_start(mut self, start: impl Fn() + Send + Sync + 'static) -> FnSink {
        self.start = Some(Box::new(start));
        self
    }

    pub fn on_shutdown(mut self, shutdown: impl Fn() + Send + Sync + 'static) -> FnSink {
        self.shutdown = Some(Box::new(shutdown));
        self
    }
}

impl EventSink for FnSink {
    fn start(&self) {
        if let Some(start) = &self.start {
            start();
        }
    }

    fn log_events(&self, payload: &str) -> bool {
        (self.log_events)(payload)
    }

    fn shutdown(&self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown();
        }
    }
}

impl std::fmt::Debug for FnSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink")
            .field("start", &self.start.is_some())
            .field("shutdown", &self.shutdown.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{EventSink, FnSink};

    #[test]
    fn fn_sink_calls_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = {
            let (a, b) = (calls.clone(), calls.clone());
            FnSink::new(|payload| payload == "ok")
                .on_start(move || {
                    a.fetch_add(1, Ordering::SeqCst);
                })
                .on_shutdown(move || {
                    b.fetch_add(10, Ordering::SeqCst);
                })
        };

        sink.start();
        assert!(sink.log_events("ok"));
        assert!(!sink.log_events("nope"));
        sink.shutdown();

        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn closure_is_a_sink() {
        let sink = |payload: &str| payload.starts_with('{');

        sink.start();
        assert!(sink.log_events("{}"));
        assert!(!EventSink::log_events(&sink, "[]"));
    }
}
