//! Configuration for [`EventPipeline`](crate::EventPipeline).
use std::time::Duration;

use crate::observer::{DropObserver, SharedDropObserver};

/// Name and version of the SDK embedding the pipeline. Included in every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkMetadata {
    /// SDK name. Usually, language name.
    pub name: &'static str,
    /// Version of SDK.
    pub version: &'static str,
}

impl Default for SdkMetadata {
    fn default() -> SdkMetadata {
        SdkMetadata {
            name: "rust",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// What to do with a new event when the buffer is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Accept the event and flush immediately. If a flush is already in flight, the event is
    /// rejected (backpressure).
    #[default]
    ForceFlush,
    /// Drop the new event. Buffered events are only delivered on the flush interval.
    DropNewest,
}

/// Configuration for [`EventPipeline`](crate::EventPipeline).
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of events held in memory.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_MAX_BUFFERED_EVENTS`].
    pub max_buffered_events: usize,
    /// Defaults to [`OverflowPolicy::ForceFlush`].
    pub overflow_policy: OverflowPolicy,
    /// Interval between periodic flushes.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_FLUSH_INTERVAL`].
    pub flush_interval: Duration,
    /// Maximum number of `log_events` calls for a single batch, including the first one. A batch
    /// that is still rejected after that is dropped.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_MAX_DELIVERY_ATTEMPTS`].
    pub max_delivery_attempts: u32,
    /// Delay before the first retry. Doubles for each subsequent retry.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_RETRY_INTERVAL`].
    pub retry_interval: Duration,
    /// Upper bound for the retry delay.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_MAX_RETRY_DELAY`].
    pub max_retry_delay: Duration,
    /// Randomized duration subtracted from each retry delay, so that many processes sharing a
    /// failing sink don't retry in lockstep.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_RETRY_JITTER`].
    pub retry_jitter: Duration,
    /// How long `shutdown()` waits for the final flush.
    ///
    /// Defaults to [`PipelineConfig::DEFAULT_SHUTDOWN_TIMEOUT`].
    pub shutdown_timeout: Duration,
    pub sdk_metadata: SdkMetadata,
    /// Receives every dropped batch. Set with [`PipelineConfig::with_drop_observer`].
    pub(crate) drop_observer: SharedDropObserver,
}

impl PipelineConfig {
    /// Default value for [`PipelineConfig::max_buffered_events`].
    pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 1000;
    /// Default value for [`PipelineConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`PipelineConfig::max_delivery_attempts`].
    pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
    /// Default value for [`PipelineConfig::retry_interval`].
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
    /// Default value for [`PipelineConfig::max_retry_delay`].
    pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(2);
    /// Default value for [`PipelineConfig::retry_jitter`].
    pub const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(50);
    /// Default value for [`PipelineConfig::shutdown_timeout`].
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

    const MIN_BUFFERED_EVENTS: usize = 1;
    const MAX_BUFFERED_EVENTS: usize = 100_000;

    /// Create a new `PipelineConfig` using default configuration.
    pub fn new() -> PipelineConfig {
        PipelineConfig::default()
    }

    /// Update buffer capacity. Clamped to `1..=100_000`.
    pub fn with_max_buffered_events(mut self, max_buffered_events: usize) -> PipelineConfig {
        self.max_buffered_events =
            max_buffered_events.clamp(Self::MIN_BUFFERED_EVENTS, Self::MAX_BUFFERED_EVENTS);
        self
    }

    pub fn with_overflow_policy(mut self, overflow_policy: OverflowPolicy) -> PipelineConfig {
        self.overflow_policy = overflow_policy;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> PipelineConfig {
        self.flush_interval = flush_interval;
        self
    }

    /// Update maximum number of delivery attempts. Zero is treated as one.
    pub fn with_max_delivery_attempts(mut self, max_delivery_attempts: u32) -> PipelineConfig {
        self.max_delivery_attempts = max_delivery_attempts.max(1);
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> PipelineConfig {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_max_retry_delay(mut self, max_retry_delay: Duration) -> PipelineConfig {
        self.max_retry_delay = max_retry_delay;
        self
    }

    pub fn with_retry_jitter(mut self, retry_jitter: Duration) -> PipelineConfig {
        self.retry_jitter = retry_jitter;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> PipelineConfig {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_sdk_metadata(mut self, sdk_metadata: SdkMetadata) -> PipelineConfig {
        self.sdk_metadata = sdk_metadata;
        self
    }

    /// Report dropped batches to `observer`, in addition to logs and metrics.
    pub fn with_drop_observer(
        mut self,
        observer: impl DropObserver + Send + Sync + 'static,
    ) -> PipelineConfig {
        self.drop_observer = SharedDropObserver::new(observer);
        self
    }

    /// Delay before retry number `retry` (1-based): `retry_interval * 2^(retry - 1)`, capped at
    /// `max_retry_delay`, minus jitter.
    pub(crate) fn retry_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self
            .retry_interval
            .saturating_mul(1 << exponent)
            .min(self.max_retry_delay);
        crate::dispatcher::jitter(delay, self.retry_jitter)
    }
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            max_buffered_events: PipelineConfig::DEFAULT_MAX_BUFFERED_EVENTS,
            overflow_policy: OverflowPolicy::default(),
            flush_interval: PipelineConfig::DEFAULT_FLUSH_INTERVAL,
            max_delivery_attempts: PipelineConfig::DEFAULT_MAX_DELIVERY_ATTEMPTS,
            retry_interval: PipelineConfig::DEFAULT_RETRY_INTERVAL,
            max_retry_delay: PipelineConfig::DEFAULT_MAX_RETRY_DELAY,
            retry_jitter: PipelineConfig::DEFAULT_RETRY_JITTER,
            shutdown_timeout: PipelineConfig::DEFAULT_SHUTDOWN_TIMEOUT,
            sdk_metadata: SdkMetadata::default(),
            drop_observer: SharedDropObserver::default(),
        }
    }
}
