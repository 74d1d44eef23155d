use std::sync::Arc;

use crate::encoder::EncodeError;

/// Represents a result type for pipeline operations.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// pipeline-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned by [`EventPipeline`](crate::EventPipeline)
/// lifecycle operations.
///
/// Recording events never returns an error: failures to deliver events are reported through
/// [`DeliveryError`] to metrics, logs and the [`DropObserver`](crate::DropObserver) instead.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// `start()` was called on a pipeline that is already running.
    #[error("event pipeline is already started")]
    AlreadyStarted,

    /// The pipeline has been shut down and cannot be restarted.
    #[error("event pipeline is shut down")]
    AlreadyShutDown,

    /// Indicates that the delivery thread panicked. This should normally never happen.
    #[error("delivery thread panicked")]
    DeliveryThreadPanicked,

    /// Events were dropped while shutting down.
    #[error(transparent)]
    Delivery(DeliveryError),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<DeliveryError> for Error {
    fn from(value: DeliveryError) -> Self {
        Self::Delivery(value)
    }
}

/// Reason a batch of events was dropped instead of being delivered.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DeliveryError {
    /// Batch could not be serialized. Never retried.
    #[error("failed to encode batch")]
    Encode(#[from] EncodeError),

    /// Sink did not accept the batch after all delivery attempts.
    #[error("sink rejected batch after {attempts} attempt(s)")]
    SinkRejected { attempts: u32 },

    /// No sink was registered when the batch was ready for delivery.
    #[error("no sink is registered")]
    SinkUnavailable,

    /// Final drain did not finish before the shutdown deadline.
    #[error("shutdown timed out with {pending} event(s) pending")]
    ShutdownTimeout { pending: usize },

    /// Delivery thread stopped unexpectedly before delivering the remaining events.
    #[error("delivery thread stopped unexpectedly")]
    Aborted,

    /// Pipeline was shut down without ever being started.
    #[error("pipeline was shut down before it was started")]
    NotStarted,
}
