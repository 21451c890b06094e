//! Runtime statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated lock-free
#[derive(Debug, Default)]
pub struct RuntimeStats {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    publishes_sent: AtomicU64,
    requests_handled: AtomicU64,
    events_dispatched: AtomicU64,
    handler_errors: AtomicU64,
    protocol_errors: AtomicU64,
}

/// Point-in-time copy of [`RuntimeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatsSnapshot {
    /// Requests this runtime sent
    pub requests_sent: u64,
    /// Responses matched to a pending request
    pub responses_received: u64,
    /// Events this runtime published
    pub publishes_sent: u64,
    /// Inbound requests handled by local agents
    pub requests_handled: u64,
    /// Deliveries of inbound events to local agents
    pub events_dispatched: u64,
    /// Inbound requests and events whose handling failed
    pub handler_errors: u64,
    /// Inbound envelopes that violated the protocol
    pub protocol_errors: u64,
    /// Agents activated
    pub activations: u64,
}

impl RuntimeStats {
    pub(crate) fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_sent(&self) {
        self.publishes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_handled(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self, activations: u64) -> RuntimeStatsSnapshot {
        RuntimeStatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            publishes_sent: self.publishes_sent.load(Ordering::Relaxed),
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            activations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = RuntimeStats::default();
        stats.record_request_sent();
        stats.record_request_sent();
        stats.record_protocol_error();

        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.requests_sent, 2);
        assert_eq!(snapshot.protocol_errors, 1);
        assert_eq!(snapshot.activations, 3);
        assert_eq!(snapshot.publishes_sent, 0);
    }
}
