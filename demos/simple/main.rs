use std::collections::HashMap;
use std::time::Duration;

use eventlog_core::{Event, EventPipeline, FnSink, PipelineConfig, UserFingerprint};

pub fn main() {
    env_logger::init();

    let pipeline = EventPipeline::new(
        PipelineConfig::new()
            .with_max_buffered_events(100)
            .with_flush_interval(Duration::from_secs(1))
            .with_drop_observer(|reason: &eventlog_core::DeliveryError, count: usize| {
                eprintln!("dropped {count} event(s): {reason}");
            }),
    );

    // A sink assembled from callbacks, the way a foreign-language host would register one.
    pipeline.set_sink(
        FnSink::new(|payload| {
            println!("{payload}");
            true
        })
        .on_start(|| println!("sink started"))
        .on_shutdown(|| println!("sink stopped")),
    );

    pipeline.start().expect("failed to start event pipeline");

    let user = UserFingerprint::compute(
        "test-subject",
        &HashMap::from([("country".to_owned(), "US".into())]),
    );
    for i in 0..10 {
        pipeline.record(
            Event::new("a-boolean-flag_exposure", user.clone()).with_metadata("iteration", i),
        );
    }

    if let Err(err) = pipeline.shutdown() {
        eprintln!("failed to flush events: {err}");
    }
}
