//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTION_STATE, ENVELOPES_DROPPED_TOTAL, ENVELOPES_RECEIVED_TOTAL, HANDLER_FAILURES_TOTAL,
    OUTBOUND_DROPPED_TOTAL, OUTBOUND_SENT_TOTAL, RECONNECT_ATTEMPTS_TOTAL,
    TRANSPORT_FAILURES_TOTAL, TRANSPORT_OPENS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn set_state(value: i64) {
        CONNECTION_STATE.set(value);
    }

    pub fn record_open() {
        TRANSPORT_OPENS_TOTAL.inc();
    }

    pub fn record_open_failure() {
        TRANSPORT_FAILURES_TOTAL.inc();
    }

    pub fn record_reconnect_attempt() {
        RECONNECT_ATTEMPTS_TOTAL.inc();
    }
}

/// Helper struct for recording inbound envelope metrics
pub struct EnvelopeMetrics;

impl EnvelopeMetrics {
    pub fn record_received(event_type: &str) {
        ENVELOPES_RECEIVED_TOTAL.with_label_values(&[event_type]).inc();
    }

    /// Record an envelope that could not be parsed
    pub fn record_malformed() {
        ENVELOPES_DROPPED_TOTAL.with_label_values(&["malformed"]).inc();
    }

    /// Record an envelope whose type no handler understands
    pub fn record_unknown_type() {
        ENVELOPES_DROPPED_TOTAL.with_label_values(&["unknown_type"]).inc();
    }

    pub fn record_handler_failure() {
        HANDLER_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording outbound metrics
pub struct OutboundMetrics;

impl OutboundMetrics {
    pub fn record_sent(event: &str) {
        OUTBOUND_SENT_TOTAL.with_label_values(&[event]).inc();
    }

    pub fn record_dropped() {
        OUTBOUND_DROPPED_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_contains_prefix() {
        EnvelopeMetrics::record_received("USER_STATUS_CHANGE");
        OutboundMetrics::record_dropped();

        let output = encode_metrics().unwrap();
        assert!(output.contains("presence_envelopes_received_total"));
        assert!(output.contains("presence_outbound_dropped_total"));
    }
}
