//! Prometheus metrics for launch observability

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};

lazy_static! {
    /// Lifecycle transitions, by the state entered.
    pub static ref LAUNCH_TRANSITIONS: CounterVec = register_counter_vec!(
        "astralvisor_launch_transitions_total",
        "Launch lifecycle transitions by target state",
        &["state"]
    )
    .unwrap();

    /// Failed launches, by error kind (see `LaunchError::kind`).
    pub static ref LAUNCH_FAILURES: CounterVec = register_counter_vec!(
        "astralvisor_launch_failures_total",
        "Launches that ended in the failed state, by error kind",
        &["kind"]
    )
    .unwrap();

    /// Asset resolver calls, by outcome ("ok" or "rejected").
    pub static ref ASSET_RESOLUTIONS: CounterVec = register_counter_vec!(
        "astralvisor_asset_resolutions_total",
        "Asset resolution callbacks by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Time from launch start until the runtime reported boot start.
    pub static ref BOOT_DURATION: Histogram = register_histogram!(
        "astralvisor_boot_duration_seconds",
        "Seconds from launch until boot code started",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
