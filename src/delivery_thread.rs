//! A background thread that flushes buffered events on a timer, on demand, and once more on
//! shutdown.
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::dispatcher::{Dispatcher, FlushOutcome, FlushTrigger};
use crate::{Error, Result};

/// Signals shared between the delivery thread and the pipeline.
#[derive(Default)]
pub(crate) struct DeliverySignals {
    /// Coalescing: any number of requests made while a flush runs result in one more flush.
    pub flush_requested: Notify,
    pub shutdown_requested: Notify,
    /// Holds `None` while the thread runs. Holds `Some(Ok(()))` once the final flush completed,
    /// or `Some(Err(...))` if the thread failed.
    finished: (Mutex<Option<Result<()>>>, Condvar),
}

impl DeliverySignals {
    fn set_finished(&self, value: Result<()>) {
        *self.finished.0.lock().unwrap_or_else(|err| err.into_inner()) = Some(value);
        self.finished.1.notify_all();
    }

    /// Wait up to `timeout` for the delivery thread to finish its final flush.
    ///
    /// Returns `None` on timeout.
    pub fn wait_finished(&self, timeout: Duration) -> Option<Result<()>> {
        let lock = self.finished.0.lock().unwrap_or_else(|err| err.into_inner());
        let (result, _) = self
            .finished
            .1
            .wait_timeout_while(lock, timeout, |result| result.is_none())
            .unwrap_or_else(|err| err.into_inner());
        result.clone()
    }
}

/// The thread delivering events to the sink.
///
/// Sink calls only happen here, so a slow sink never stalls the threads recording events.
pub(crate) struct DeliveryThread {
    join_handle: std::thread::JoinHandle<()>,
    signals: Arc<DeliverySignals>,
}

impl DeliveryThread {
    /// Spawn the delivery thread.
    ///
    /// The tokio runtime is built here, so failing to build it is reported to the caller instead
    /// of leaving a pipeline that never delivers.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        signals: Arc<DeliverySignals>,
        flush_interval: Duration,
    ) -> std::io::Result<DeliveryThread> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let join_handle = {
            let signals = Arc::clone(&signals);
            std::thread::Builder::new()
                .name("eventlog-delivery".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        runtime.block_on(run(&dispatcher, &signals, flush_interval));
                    }));

                    signals.set_finished(match result {
                        Ok(()) => Ok(()),
                        // If catch_unwind returns Err, it means a panic occurred.
                        Err(_panic_info) => {
                            log::warn!(target: "eventlog", "delivery thread panicked, events are no longer delivered");
                            // Records would otherwise keep hitting backpressure.
                            dispatcher.buffer().end_flush();
                            Err(Error::DeliveryThreadPanicked)
                        }
                    });
                })?
        };

        Ok(DeliveryThread {
            join_handle,
            signals,
        })
    }

    /// Request final flush and wait up to `timeout` for it.
    ///
    /// Returns `None` if the thread did not finish in time. The thread is then detached.
    pub fn shutdown(self, timeout: Duration) -> Option<Result<()>> {
        self.signals.shutdown_requested.notify_one();

        let result = self.signals.wait_finished(timeout)?;
        // Result is already set, so the thread is exiting; joining cannot block for long.
        if self.join_handle.join().is_err() {
            return Some(Err(Error::DeliveryThreadPanicked));
        }
        Some(result)
    }
}

async fn run(dispatcher: &Dispatcher, signals: &DeliverySignals, flush_interval: Duration) {
    log::debug!(target: "eventlog", "delivery thread started");
    let flush_interval = flush_interval.max(Duration::from_millis(1));
    let mut timer = interval_at(Instant::now() + flush_interval, flush_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let trigger = tokio::select! {
            // Shutdown wins over pending flushes: the final flush drains everything anyway.
            biased;
            _ = signals.shutdown_requested.notified() => break,
            _ = signals.flush_requested.notified() => {
                if dispatcher.buffer().is_full() {
                    FlushTrigger::CapacityExceeded
                } else {
                    FlushTrigger::Manual
                }
            }
            _ = timer.tick() => FlushTrigger::Timer,
        };

        let mut outcome = dispatcher.flush(trigger).await;
        // Buffer filled up again while the sink was busy: run the pending flush right away.
        while matches!(
            outcome,
            FlushOutcome::Delivered { .. } | FlushOutcome::Dropped { .. }
        ) && dispatcher.buffer().is_full()
        {
            outcome = dispatcher.flush(FlushTrigger::CapacityExceeded).await;
        }
    }

    log::debug!(target: "eventlog", "delivery thread received shutdown command");
    let outcome = dispatcher.flush(FlushTrigger::Shutdown).await;
    log::debug!(target: "eventlog", "final flush finished: {outcome:?}");
}
