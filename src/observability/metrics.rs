//! Metrics collection.
//!
//! # Metrics
//! - `http_client_timeouts_total` (counter): expired timeouts by phase
//! - `http_client_request_duration_seconds` (histogram): latency by outcome
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the embedding application
//!   installs whichever recorder/exporter it wants
//! - Without a recorder every call is a no-op

use std::time::Instant;

use crate::resilience::emitter::Phase;

/// Count one expired timeout.
pub fn record_timeout(phase: Phase) {
    metrics::counter!("http_client_timeouts_total", "phase" => phase.as_str()).increment(1);
}

/// Record the latency of one finished request.
pub fn record_request(outcome: &'static str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!("http_client_request_duration_seconds", "outcome" => outcome).record(duration);
}
