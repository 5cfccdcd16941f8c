//! Connect and socket timeouts for outbound HTTP requests.
//!
//! Two independent phases can be attached to one in-flight request:
//!
//! - **connect**: from dispatch until the transport connection is established
//! - **socket**: the longest idle gap between two bytes once connected,
//!   reset by every read or write
//!
//! ```text
//!   HttpClient::request() ──▶ RequestHandle ──▶ resilience::attach(handle, config)
//!                                  │
//!         signals: assigned, connected, activity, completed, errored, released
//!                                  ▼
//!                         TimeoutController ──(expiry)──▶ emitter::fail
//!                                                           │
//!                         ETIMEDOUT / ESOCKETTIMEDOUT ◀─────┘ via handle.failed()
//! ```
//!
//! Connections reused from the keep-alive pool skip the connect phase, and
//! each physical connection is instrumented at most once per request.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod observability;
pub mod resilience;

pub use config::{ClientConfig, TimeoutConfig};
pub use http::{ClientError, HttpClient, RequestHandle};
pub use net::ConnectionHandle;
pub use resilience::{attach, TimeoutError, TimeoutKind};
