//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Timeout controller, emitter, client:
//!     → logging.rs (structured log events with request/connection IDs)
//!     → metrics.rs (timeout counters, latency histograms)
//! ```
//!
//! # Design Decisions
//! - Request ID and connection ID flow through every event
//! - Metrics are cheap and optional

pub mod logging;
pub mod metrics;
