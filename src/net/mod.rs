//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request
//!     → target.rs (host/port the request is addressed to)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → io.rs (socket wrapper reporting every byte of activity)
//!     → instrument.rs (routes activity to the occupying request)
//!
//! Connection States:
//!     Connecting → Established → Destroyed
//! ```
//!
//! # Design Decisions
//! - One physical connection serves one logical request at a time
//! - Instrumentation is keyed by request identity, never duplicated
//! - Destroying a connection is idempotent and observable

pub mod connection;
pub mod instrument;
pub mod io;
pub mod target;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionState};
pub use instrument::{InstrumentationGuard, InstrumentationMarker};
pub use io::ObservedIo;
pub use target::Target;
