//! Client instrumentation.
//!
//! Counters go through the `metrics` facade; nothing is recorded until the
//! application installs a recorder (the `tether` binary can install the
//! Prometheus exporter).

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const COMMANDS_TOTAL: &str = "tether_commands_total";
    pub const FIRE_AND_FORGET_TOTAL: &str = "tether_fire_and_forget_total";
    pub const REPLIES_MATCHED_TOTAL: &str = "tether_replies_matched_total";
    pub const TIMEOUTS_TOTAL: &str = "tether_timeouts_total";
    pub const PROBES_TOTAL: &str = "tether_probes_total";
    pub const RESOLUTIONS_TOTAL: &str = "tether_resolutions_total";
    pub const INBOUND_FRAMES_TOTAL: &str = "tether_inbound_frames_total";
    pub const PENDING_CORRELATIONS: &str = "tether_pending_correlations";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Commands written to the transport");
    metrics::describe_counter!(
        names::FIRE_AND_FORGET_TOTAL,
        "Commands that expect no reply"
    );
    metrics::describe_counter!(
        names::REPLIES_MATCHED_TOTAL,
        "Inbound frames that resolved a pending correlation"
    );
    metrics::describe_counter!(
        names::TIMEOUTS_TOTAL,
        "Reply, probe and handshake deadlines that expired"
    );
    metrics::describe_counter!(names::PROBES_TOTAL, "Keepalive probes sent");
    metrics::describe_counter!(names::RESOLUTIONS_TOTAL, "Endpoint resolutions attempted");
    metrics::describe_counter!(names::INBOUND_FRAMES_TOTAL, "Decoded inbound frames");
    metrics::describe_gauge!(
        names::PENDING_CORRELATIONS,
        "Commands waiting for their reply"
    );
}

/// Record a command written to the transport.
pub fn record_command(cmd: &'static str, correlated: bool) {
    counter!(names::COMMANDS_TOTAL, "cmd" => cmd).increment(1);
    if !correlated {
        counter!(names::FIRE_AND_FORGET_TOTAL, "cmd" => cmd).increment(1);
    }
}

pub fn record_reply_matched() {
    counter!(names::REPLIES_MATCHED_TOTAL).increment(1);
}

/// Record an expired deadline; `kind` is `reply`, `probe` or `handshake`.
pub fn record_timeout(kind: &'static str) {
    counter!(names::TIMEOUTS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_probe() {
    counter!(names::PROBES_TOTAL).increment(1);
}

pub fn record_resolution(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!(names::RESOLUTIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_inbound() {
    counter!(names::INBOUND_FRAMES_TOTAL).increment(1);
}

pub fn set_pending_correlations(count: usize) {
    gauge!(names::PENDING_CORRELATIONS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op.
        describe_metrics();
        record_command("direct", true);
        record_command("ack", false);
        record_timeout("probe");
        record_resolution(false);
        set_pending_correlations(3);
    }
}
