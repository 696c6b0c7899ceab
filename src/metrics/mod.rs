//! Prometheus metrics for the presence client.
//!
//! - Connection metrics (state, opens, failures, reconnect attempts)
//! - Envelope metrics (received by type, dropped by reason, handler failures)
//! - Outbound metrics (sent, dropped while disconnected)
//! - Roster size

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, EnvelopeMetrics, OutboundMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "presence";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Current connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)"
    ).unwrap();

    /// Successful transport opens
    pub static ref TRANSPORT_OPENS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_transport_opens_total", METRIC_PREFIX),
        "Total successful transport opens"
    ).unwrap();

    /// Failed transport open attempts
    pub static ref TRANSPORT_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_transport_failures_total", METRIC_PREFIX),
        "Total failed transport open attempts"
    ).unwrap();

    /// Reconnection attempts scheduled by the transport policy
    pub static ref RECONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnect_attempts_total", METRIC_PREFIX),
        "Total reconnection attempts"
    ).unwrap();

    // ============================================================================
    // Envelope Metrics
    // ============================================================================

    /// Inbound envelopes by wire type
    pub static ref ENVELOPES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_envelopes_received_total", METRIC_PREFIX),
        "Total inbound envelopes",
        &["type"]
    ).unwrap();

    /// Inbound envelopes dropped before reaching a handler
    pub static ref ENVELOPES_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_envelopes_dropped_total", METRIC_PREFIX),
        "Total inbound envelopes dropped",
        &["reason"]
    ).unwrap();

    /// Handler invocations that returned an error or panicked
    pub static ref HANDLER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_handler_failures_total", METRIC_PREFIX),
        "Total handler failures during dispatch"
    ).unwrap();

    // ============================================================================
    // Outbound Metrics
    // ============================================================================

    /// Outbound envelopes forwarded to the transport
    pub static ref OUTBOUND_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_outbound_sent_total", METRIC_PREFIX),
        "Total outbound envelopes forwarded",
        &["event"]
    ).unwrap();

    /// Outbound envelopes rejected because the connection was not live
    pub static ref OUTBOUND_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_outbound_dropped_total", METRIC_PREFIX),
        "Total outbound envelopes dropped while not connected"
    ).unwrap();

    // ============================================================================
    // Roster Metrics
    // ============================================================================

    /// Number of subjects in the roster
    pub static ref ROSTER_SIZE: IntGauge = register_int_gauge!(
        format!("{}_roster_size", METRIC_PREFIX),
        "Number of subjects currently held in the roster"
    ).unwrap();
}
