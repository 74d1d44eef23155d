//! Serialization of a [`Batch`] into the payload handed to [`EventSink::log_events`].
//!
//! [`EventSink::log_events`]: crate::EventSink::log_events
use std::sync::Arc;

use serde::Serialize;

use crate::config::SdkMetadata;
use crate::event::{Batch, Event, EventValue};

/// Errors that prevent a batch from being encoded. These are never retried: malformed data will
/// not become encodable on a later attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EncodeError {
    /// Empty batches are never sent downstream.
    #[error("refusing to encode an empty batch")]
    EmptyBatch,

    #[error("event at index {index} has an empty name")]
    MissingEventName { index: usize },

    /// JSON has no representation for NaN and infinities.
    #[error("event {name:?} has a non-finite numeric value")]
    NonFiniteValue { name: String },

    #[error("failed to serialize batch: {0}")]
    // serde_json::Error is not clonable, so we only keep the message.
    Serialization(Arc<str>),
}

impl From<serde_json::Error> for EncodeError {
    fn from(value: serde_json::Error) -> Self {
        EncodeError::Serialization(value.to_string().into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayloadMetadata {
    sdk_name: &'static str,
    sdk_version: &'static str,
    core_version: &'static str,
}

impl From<&SdkMetadata> for PayloadMetadata {
    fn from(sdk: &SdkMetadata) -> PayloadMetadata {
        PayloadMetadata {
            sdk_name: sdk.name,
            sdk_version: sdk.version,
            core_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    events: &'a [Event],
    metadata: PayloadMetadata,
}

/// Encode `batch` into a single JSON payload.
///
/// This is a pure function: it performs no I/O and touches no shared state.
///
/// # Errors
///
/// - [`EncodeError::EmptyBatch`] if `batch` has no events.
/// - [`EncodeError::MissingEventName`] if an event has an empty name.
/// - [`EncodeError::NonFiniteValue`] if an event value is NaN or infinite.
/// - [`EncodeError::Serialization`] if serde_json fails.
pub fn encode_batch(batch: &Batch, sdk: &SdkMetadata) -> Result<String, EncodeError> {
    if batch.is_empty() {
        return Err(EncodeError::EmptyBatch);
    }

    for (index, event) in batch.events().iter().enumerate() {
        if event.name().is_empty() {
            return Err(EncodeError::MissingEventName { index });
        }
        // serde_json silently writes `null` for non-finite floats, which would lose data.
        if let Some(EventValue::Number(n)) = event.value() {
            if !n.is_finite() {
                return Err(EncodeError::NonFiniteValue {
                    name: event.name().to_owned(),
                });
            }
        }
    }

    let payload = Payload {
        events: batch.events(),
        metadata: sdk.into(),
    };
    Ok(serde_json::to_string(&payload)?)
}
