//! Metrics collection for Agora
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Instruments are recorded through the OpenTelemetry global meter when the
//! `otel` feature is enabled. Without it every function is a no-op, so call
//! sites never need feature gates.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static AGENTS_ACTIVATED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("agora")
        .u64_counter(METRIC_NAME_AGENTS_ACTIVATED_TOTAL)
        .with_description("Total number of agent activations")
        .init()
});

#[cfg(feature = "otel")]
static ENVELOPES_SENT_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("agora")
        .u64_counter(METRIC_NAME_ENVELOPES_SENT_TOTAL)
        .with_description("Total envelopes written to the gateway")
        .init()
});

#[cfg(feature = "otel")]
static ENVELOPES_RECEIVED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("agora")
        .u64_counter(METRIC_NAME_ENVELOPES_RECEIVED_TOTAL)
        .with_description("Total envelopes read from the gateway")
        .init()
});

#[cfg(feature = "otel")]
static REQUEST_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("agora")
        .f64_histogram(METRIC_NAME_REQUEST_DURATION_SECONDS)
        .with_description("Request round-trip duration in seconds")
        .init()
});

#[cfg(feature = "otel")]
static RECONNECTS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("agora")
        .u64_counter(METRIC_NAME_RECONNECTS_TOTAL)
        .with_description("Total channel reconnects")
        .init()
});

/// Record an agent activation
#[cfg(feature = "otel")]
pub fn record_agent_activated() {
    AGENTS_ACTIVATED_COUNTER.add(1, &[]);
}

/// Record an envelope written to the wire
#[cfg(feature = "otel")]
pub fn record_envelope_sent(kind: &'static str) {
    ENVELOPES_SENT_COUNTER.add(1, &[KeyValue::new("kind", kind)]);
}

/// Record an envelope read from the wire
#[cfg(feature = "otel")]
pub fn record_envelope_received(kind: &'static str) {
    ENVELOPES_RECEIVED_COUNTER.add(1, &[KeyValue::new("kind", kind)]);
}

/// Record a completed request
///
/// # Arguments
/// * `status` - "success", "remote_error", "timeout", "cancelled" or "delivery_error"
/// * `duration_seconds` - Round-trip duration in seconds
#[cfg(feature = "otel")]
pub fn record_request(status: &'static str, duration_seconds: f64) {
    REQUEST_DURATION_HISTOGRAM.record(duration_seconds, &[KeyValue::new("status", status)]);
}

/// Record a channel reconnect
#[cfg(feature = "otel")]
pub fn record_reconnect() {
    RECONNECTS_COUNTER.add(1, &[]);
}

// No-op implementations when otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn record_agent_activated() {}

#[cfg(not(feature = "otel"))]
pub fn record_envelope_sent(_kind: &'static str) {}

#[cfg(not(feature = "otel"))]
pub fn record_envelope_received(_kind: &'static str) {}

#[cfg(not(feature = "otel"))]
pub fn record_request(_status: &'static str, _duration_seconds: f64) {}

#[cfg(not(feature = "otel"))]
pub fn record_reconnect() {}
