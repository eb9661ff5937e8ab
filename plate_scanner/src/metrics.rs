use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref FRAMES_SEEN: IntCounter =
        register_int_counter!("plate_frames_seen_total", "Frames handed to the processor")
            .expect("register plate_frames_seen_total");
    pub static ref FRAMES_PROCESSED: IntCounter = register_int_counter!(
        "plate_frames_processed_total",
        "Frames that passed the frame-skip throttle"
    )
    .expect("register plate_frames_processed_total");
    pub static ref CANDIDATES: IntCounter = register_int_counter!(
        "plate_candidates_total",
        "Candidate regions returned by the region detector"
    )
    .expect("register plate_candidates_total");
    pub static ref OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "plate_outcomes_total",
        "Terminal outcome of every processed frame or region",
        &["outcome"]
    )
    .expect("register plate_outcomes_total");
    pub static ref BACKEND_FAILURES: IntCounterVec = register_int_counter_vec!(
        "plate_backend_failures_total",
        "Recognition backend calls that failed and were treated as empty",
        &["backend"]
    )
    .expect("register plate_backend_failures_total");
    pub static ref SINK_FAILURES: IntCounterVec = register_int_counter_vec!(
        "plate_sink_failures_total",
        "Evidence or event sink failures",
        &["sink"]
    )
    .expect("register plate_sink_failures_total");
}

/// Text exposition of every metric in the default registry.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::warn!("Cannot encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
