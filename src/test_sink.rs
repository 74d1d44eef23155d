//! A sink that records every call, for tests.
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::sink::EventSink;

#[derive(Default)]
struct State {
    log: Vec<&'static str>,
    payloads: Vec<String>,
    accepted: Vec<String>,
    /// Number of `log_events` calls to reject before accepting. `None` rejects forever.
    reject_first: Option<usize>,
    blocked: bool,
    called: bool,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    state: Arc<(Mutex<State>, Condvar)>,
}

impl RecordingSink {
    fn with_rejections(reject_first: Option<usize>) -> RecordingSink {
        let sink = RecordingSink::default();
        sink.state.0.lock().unwrap().reject_first = reject_first;
        sink
    }

    pub fn accepting() -> RecordingSink {
        RecordingSink::with_rejections(Some(0))
    }

    pub fn rejecting() -> RecordingSink {
        RecordingSink::with_rejections(None)
    }

    pub fn accepting_after(rejections: usize) -> RecordingSink {
        RecordingSink::with_rejections(Some(rejections))
    }

    /// Make `log_events` block until [`RecordingSink::unblock`] is called.
    pub fn blocking(self) -> RecordingSink {
        self.state.0.lock().unwrap().blocked = true;
        self
    }

    pub fn unblock(&self) {
        self.state.0.lock().unwrap().blocked = false;
        self.state.1.notify_all();
    }

    /// Wait until `log_events` has been entered at least once.
    pub fn wait_until_called(&self) {
        let (lock, condvar) = &*self.state;
        let (_state, timeout) = condvar
            .wait_timeout_while(lock.lock().unwrap(), Duration::from_secs(5), |s| !s.called)
            .unwrap();
        assert!(!timeout.timed_out(), "sink was never called");
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.state.0.lock().unwrap().log.clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.state.0.lock().unwrap().payloads.clone()
    }

    pub fn attempts(&self) -> usize {
        self.count("log_events")
    }

    pub fn starts(&self) -> usize {
        self.count("start")
    }

    pub fn shutdowns(&self) -> usize {
        self.count("shutdown")
    }

    fn count(&self, call: &str) -> usize {
        self.log().iter().filter(|c| **c == call).count()
    }

    /// Names of events in all accepted payloads, in delivery order.
    pub fn event_names(&self) -> Vec<String> {
        let state = self.state.0.lock().unwrap();
        state
            .accepted
            .iter()
            .flat_map(|payload| {
                let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
                payload["events"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|e| e["eventName"].as_str().unwrap().to_owned())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn start(&self) {
        self.state.0.lock().unwrap().log.push("start");
    }

    fn log_events(&self, payload: &str) -> bool {
        let (lock, condvar) = &*self.state;
        let mut state = lock.lock().unwrap();
        state.log.push("log_events");
        state.payloads.push(payload.to_owned());
        state.called = true;
        condvar.notify_all();

        let mut state = condvar.wait_while(state, |s| s.blocked).unwrap();
        let accepted = match &mut state.reject_first {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        };
        if accepted {
            state.accepted.push(payload.to_owned());
        }
        accepted
    }

    fn shutdown(&self) {
        self.state.0.lock().unwrap().log.push("shutdown");
    }
}
