//! Metrics collection for `breachdrill`.
//!
//! Prometheus-compatible metrics with label cardinality protection and typed
//! helpers for the session, connection and gateway layers.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::DrillError;
use crate::session::state::{LifecycleState, Outcome};

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Inbound message tags accepted as label values.
///
/// Tags come from the remote side, so anything else is bucketed as
/// `"__unknown__"`.
const KNOWN_TAGS: [&str; 4] = ["opponent_action", "match_started", "game_result", "finished"];

/// Sanitizes an inbound message tag for use as a metrics label.
#[must_use]
pub fn sanitize_tag_label(tag: &str) -> &str {
    if KNOWN_TAGS.contains(&tag) {
        tag
    } else {
        "__unknown__"
    }
}

/// Initializes the global metrics recorder.
///
/// With `Some(port)` a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`; with `None` the recorder is installed without an
/// endpoint.
///
/// # Errors
///
/// Returns `DrillError::Io` if the recorder or listener cannot be installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), DrillError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| DrillError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "breachdrill_transitions_total",
        "Lifecycle transitions by source and target state"
    );
    describe_counter!(
        "breachdrill_inbound_messages_total",
        "Inbound protocol messages by tag"
    );
    describe_counter!(
        "breachdrill_malformed_messages_total",
        "Inbound frames dropped as malformed"
    );
    describe_counter!(
        "breachdrill_outbound_messages_total",
        "Outbound protocol messages by tag"
    );
    describe_counter!(
        "breachdrill_reconnects_total",
        "Reconnection attempts scheduled"
    );
    describe_counter!("breachdrill_outcomes_total", "Session outcomes");
    describe_counter!(
        "breachdrill_gateway_failures_total",
        "Collaborator call failures by operation"
    );
    describe_gauge!(
        "breachdrill_remaining_seconds",
        "Seconds left on the countdown"
    );
}

/// Records a lifecycle edge.
pub fn record_transition(from: LifecycleState, to: LifecycleState) {
    counter!(
        "breachdrill_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Records an inbound message.
pub fn record_inbound(tag: &str) {
    let label = sanitize_tag_label(tag);
    counter!("breachdrill_inbound_messages_total", "tag" => label.to_owned()).increment(1);
}

/// Records a dropped malformed frame.
pub fn record_malformed() {
    counter!("breachdrill_malformed_messages_total").increment(1);
}

/// Records an outbound message.
pub fn record_outbound(tag: &'static str) {
    counter!("breachdrill_outbound_messages_total", "tag" => tag).increment(1);
}

/// Records a scheduled reconnection.
pub fn record_reconnect() {
    counter!("breachdrill_reconnects_total").increment(1);
}

/// Records the final outcome.
pub fn record_outcome(outcome: Outcome) {
    counter!("breachdrill_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

/// Records a failed collaborator call.
pub fn record_gateway_failure(operation: &'static str) {
    counter!("breachdrill_gateway_failures_total", "operation" => operation).increment(1);
}

/// Sets the countdown gauge.
pub fn set_remaining_seconds(seconds: u32) {
    gauge!("breachdrill_remaining_seconds").set(f64::from(seconds));
}
