//! A thread-safe slot holding the currently active sink. [`SinkRegistry`] provides concurrent
//! access for readers (the delivery thread) and writers (code registering a new sink).
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Once, RwLock};

use crate::sink::EventSink;

struct SinkHandleInner {
    sink: Box<dyn EventSink>,
    started: Once,
    shut_down: Once,
}

/// A cheap-to-clone reference to a registered sink.
///
/// Every handle represents one *activation* of a sink: `start()` and `shutdown()` are forwarded
/// to the sink at most once per handle, no matter how many clones call them.
#[derive(Clone)]
pub struct SinkHandle(Arc<SinkHandleInner>);

impl SinkHandle {
    pub fn new(sink: impl EventSink + 'static) -> SinkHandle {
        SinkHandle::from_boxed(Box::new(sink))
    }

    pub fn from_boxed(sink: Box<dyn EventSink>) -> SinkHandle {
        SinkHandle(Arc::new(SinkHandleInner {
            sink,
            started: Once::new(),
            shut_down: Once::new(),
        }))
    }

    /// Call the sink's `start()` unless it was called already.
    ///
    /// Blocks if another thread is currently starting the sink, so once this returns the sink is
    /// guaranteed to be started.
    pub fn ensure_started(&self) {
        self.0.started.call_once(|| {
            log::debug!(target: "eventlog", "starting sink");
            let result = catch_unwind(AssertUnwindSafe(|| self.0.sink.start()));
            if result.is_err() {
                log::warn!(target: "eventlog", "sink panicked in start()");
            }
        });
    }

    pub fn is_started(&self) -> bool {
        self.0.started.is_completed()
    }

    /// Deliver `payload`. A panic inside the sink is reported as "not accepted".
    pub fn log_events(&self, payload: &str) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.0.sink.log_events(payload))) {
            Ok(accepted) => accepted,
            Err(_) => {
                log::warn!(target: "eventlog", "sink panicked in log_events()");
                false
            }
        }
    }

    /// Call the sink's `shutdown()` unless it was called already.
    pub fn shutdown(&self) {
        self.0.shut_down.call_once(|| {
            log::debug!(target: "eventlog", "shutting down sink");
            let result = catch_unwind(AssertUnwindSafe(|| self.0.sink.shutdown()));
            if result.is_err() {
                log::warn!(target: "eventlog", "sink panicked in shutdown()");
            }
        });
    }

    /// Whether `self` and `other` refer to the same activation.
    pub fn ptr_eq(&self, other: &SinkHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("started", &self.0.started.is_completed())
            .field("shut_down", &self.0.shut_down.is_completed())
            .finish_non_exhaustive()
    }
}

/// `SinkRegistry` provides a thread-safe (`Sync`) slot for the active sink.
///
/// The handle is always replaced as a whole, so readers never observe a partially-constructed
/// sink. Deliveries that already hold a clone of the previous handle complete against it.
#[derive(Default)]
pub struct SinkRegistry {
    sink: RwLock<Option<SinkHandle>>,
}

impl SinkRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        SinkRegistry::default()
    }

    /// Get currently-active sink. Returns None if no sink is registered.
    pub fn current(&self) -> Option<SinkHandle> {
        // Lock can only be poisoned if a writer panicked while holding it. The slot is replaced
        // with a single assignment, so the value is still consistent.
        let sink = self.sink.read().unwrap_or_else(|err| err.into_inner());
        sink.clone()
    }

    /// Set new sink, returning the previous one.
    pub fn set_sink(&self, handle: SinkHandle) -> Option<SinkHandle> {
        let mut slot = self.sink.write().unwrap_or_else(|err| err.into_inner());
        slot.replace(handle)
    }

    /// Remove the active sink, returning it.
    pub fn take(&self) -> Option<SinkHandle> {
        let mut slot = self.sink.write().unwrap_or_else(|err| err.into_inner());
        slot.take()
    }
}
