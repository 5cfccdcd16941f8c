//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request handle from the transport:
//!     → timeouts.rs (attach; connect phase, then sliding socket phase)
//!     → On expiry: emitter.rs (abort connection, publish typed error)
//!     → Caller sees the error on the request's failure channel
//! ```
//!
//! # Design Decisions
//! - Timeouts are per phase, never a cumulative deadline
//! - No retries here; a timeout is terminal for the request
//! - Errors are distinct from transport errors and carry a stable code

pub mod emitter;
pub mod timeouts;

pub use emitter::{Phase, TimeoutError, TimeoutKind};
pub use timeouts::{attach, PhaseTimer};
