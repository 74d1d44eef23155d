use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config::OverflowPolicy;
use crate::event::{Batch, Event};

/// Why [`EventBuffer::record`] refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The buffer is at capacity and a flush is already in flight.
    Backpressure,
    /// The buffer is at capacity and the overflow policy is [`OverflowPolicy::DropNewest`].
    Overflow,
    /// The pipeline is draining or shut down.
    Closed,
}

/// Result of [`EventBuffer::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Buffered,
    /// The event was buffered and the buffer reached capacity. The caller must wake the
    /// dispatcher.
    FlushRequested,
    Rejected(RejectReason),
}

impl RecordOutcome {
    pub fn is_accepted(self) -> bool {
        !matches!(self, RecordOutcome::Rejected(_))
    }
}

#[derive(Debug, Default)]
struct BufferState {
    events: Vec<Event>,
    /// Size of the batch last handed out by `drain_for_flush` and not yet completed.
    in_flight: usize,
    closed: bool,
}

/// In-memory, bounded buffer of recorded events.
///
/// Recording only contends on an in-memory mutex and never waits for delivery.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    policy: OverflowPolicy,
    state: Mutex<BufferState>,
    /// Set from the moment a flush is requested (or started) until it reaches a terminal state.
    flush_in_flight: AtomicBool,
}

impl EventBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        EventBuffer {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(BufferState::default()),
            flush_in_flight: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // A panic while holding the lock can only happen inside Vec::push (allocation failure),
        // which leaves the Vec consistent.
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn record(&self, event: Event) -> RecordOutcome {
        let mut state = self.lock();
        if state.closed {
            return RecordOutcome::Rejected(RejectReason::Closed);
        }

        if state.events.len() >= self.capacity {
            if self.policy == OverflowPolicy::DropNewest {
                return RecordOutcome::Rejected(RejectReason::Overflow);
            }
            if !self.try_claim_flush() {
                return RecordOutcome::Rejected(RejectReason::Backpressure);
            }
            // Nothing was in flight: accept one event over capacity and force a flush.
            state.events.push(event);
            return RecordOutcome::FlushRequested;
        }

        state.events.push(event);
        if state.events.len() >= self.capacity
            && self.policy == OverflowPolicy::ForceFlush
            && self.try_claim_flush()
        {
            RecordOutcome::FlushRequested
        } else {
            RecordOutcome::Buffered
        }
    }

    /// Atomically remove and return all buffered events.
    ///
    /// The returned events count as in flight until [`EventBuffer::complete_in_flight`] or
    /// [`EventBuffer::discard`] is called.
    pub fn drain_for_flush(&self) -> Batch {
        let mut state = self.lock();
        let events = std::mem::take(&mut state.events);
        state.in_flight = events.len();
        Batch::new(events)
    }

    /// Mark the in-flight batch as finished.
    ///
    /// Returns `false` if it was discarded in the meantime, in which case its outcome must not be
    /// reported again.
    pub(crate) fn complete_in_flight(&self) -> bool {
        std::mem::take(&mut self.lock().in_flight) != 0
    }

    /// Whether the last drained batch is still owned by the dispatcher.
    pub(crate) fn has_in_flight(&self) -> bool {
        self.lock().in_flight != 0
    }

    /// Drop all buffered events together with the in-flight batch, returning how many events
    /// were discarded.
    pub(crate) fn discard(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.events.len() + std::mem::take(&mut state.in_flight);
        state.events.clear();
        discarded
    }

    /// Stop accepting events. Events already buffered stay until drained.
    ///
    /// Returns `false` if the buffer was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.closed, true)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn begin_flush(&self) {
        self.flush_in_flight.store(true, Ordering::Release);
    }

    pub(crate) fn end_flush(&self) {
        self.flush_in_flight.store(false, Ordering::Release);
    }

    pub fn is_flush_in_flight(&self) -> bool {
        self.flush_in_flight.load(Ordering::Acquire)
    }

    fn try_claim_flush(&self) -> bool {
        self.flush_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
