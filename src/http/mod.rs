//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! HttpClient::request()
//!     → request.rs (RequestHandle created, lifecycle signals)
//!     → pool.rs (reuse an established connection if one is idle)
//!     ← caller attaches timeouts to the handle here
//! PendingRequest::send()
//!     → client.rs (connect if needed, exchange over hyper http1)
//!     → pool.rs (connection released back, instrumentation reset)
//! ```

pub mod client;
pub mod pool;
pub mod request;

pub use client::{ClientError, Connect, HttpClient, PendingRequest, TcpConnector};
pub use pool::{ConnectionPool, PooledConnection};
pub use request::{Outcome, RequestHandle, RequestId, Signal, Subscription, WeakRequestHandle};
