use std::sync::Arc;

use crate::error::DeliveryError;

/// A trait for reporting dropped events to the host's error-observability system.
///
/// Drops are also logged (target `eventlog`) and counted in
/// [`PipelineMetrics`](crate::PipelineMetrics), so implementing this trait is optional.
///
/// # Examples
///
/// ```
/// # use eventlog_core::{DeliveryError, EventPipeline, PipelineConfig};
/// let config = PipelineConfig::new().with_drop_observer(
///     |reason: &DeliveryError, event_count: usize| {
///         eprintln!("dropped {event_count} event(s): {reason}");
///     },
/// );
/// let pipeline = EventPipeline::new(config);
/// ```
///
/// # Notes
///
/// This method is called from the delivery thread (or from the thread calling `shutdown()`), so
/// it should return quickly and should not panic.
pub trait DropObserver {
    /// Called once per dropped batch.
    fn on_drop(&self, reason: &DeliveryError, event_count: usize);
}

pub(crate) struct NoopDropObserver;
impl DropObserver for NoopDropObserver {
    fn on_drop(&self, _reason: &DeliveryError, _event_count: usize) {}
}

/// Observer stored in [`PipelineConfig`](crate::PipelineConfig).
#[derive(Clone)]
pub(crate) struct SharedDropObserver(Arc<dyn DropObserver + Send + Sync>);

impl SharedDropObserver {
    pub fn new(observer: impl DropObserver + Send + Sync + 'static) -> SharedDropObserver {
        SharedDropObserver(Arc::new(observer))
    }
}

impl Default for SharedDropObserver {
    fn default() -> SharedDropObserver {
        SharedDropObserver::new(NoopDropObserver)
    }
}

impl std::fmt::Debug for SharedDropObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DropObserver")
    }
}

impl DropObserver for SharedDropObserver {
    fn on_drop(&self, reason: &DeliveryError, event_count: usize) {
        self.0.on_drop(reason, event_count);
    }
}

impl<T: Fn(&DeliveryError, usize)> DropObserver for T {
    fn on_drop(&self, reason: &DeliveryError, event_count: usize) {
        self(reason, event_count);
    }
}
