//! Timeout error emission.
//!
//! # Responsibilities
//! - Define the timeout error taxonomy and its stable codes
//! - Abort the request (and its connection) when a phase timer expires
//! - Surface the failure through the request's own error channel
//!
//! # Design Decisions
//! - Single path that terminates a request on timeout
//! - First outcome wins: a request that already finished is left alone
//! - Messages are a compatibility contract and must not change

use crate::http::request::RequestHandle;
use crate::observability::metrics;

/// Timed phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// From dispatch until the connection is established.
    Connect,
    /// Idle gap between two bytes on an established connection.
    Socket,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connect => "connect",
            Phase::Socket => "socket",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable discriminator of a timeout failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// `ETIMEDOUT`: the connection was not established in time.
    ETimedOut,
    /// `ESOCKETTIMEDOUT`: the established connection went idle for too long.
    ESocketTimedOut,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::ETimedOut => "ETIMEDOUT",
            TimeoutKind::ESocketTimedOut => "ESOCKETTIMEDOUT",
        }
    }
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error raised when a timeout phase expires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("Connection timed out on request to {host}")]
    Connect { host: String },

    #[error("Socket timed out on request to {host}:{port}")]
    Socket { host: String, port: u16 },
}

impl TimeoutError {
    pub fn kind(&self) -> TimeoutKind {
        match self {
            TimeoutError::Connect { .. } => TimeoutKind::ETimedOut,
            TimeoutError::Socket { .. } => TimeoutKind::ESocketTimedOut,
        }
    }

    /// Stable error code, `ETIMEDOUT` or `ESOCKETTIMEDOUT`.
    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn phase(&self) -> Phase {
        match self {
            TimeoutError::Connect { .. } => Phase::Connect,
            TimeoutError::Socket { .. } => Phase::Socket,
        }
    }
}

/// Fail `request` because `phase` expired.
///
/// Destroys the connection or pending connection attempt and publishes the
/// error on the request's failure channel. Returns `false` when the request
/// had already reached a terminal outcome, in which case nothing happens.
pub fn fail(request: &RequestHandle, phase: Phase) -> bool {
    let target = request.target();
    let error = match phase {
        Phase::Connect => TimeoutError::Connect {
            host: target.host().to_string(),
        },
        Phase::Socket => TimeoutError::Socket {
            host: target.host().to_string(),
            port: target.port(),
        },
    };

    if !request.abort(error.clone()) {
        tracing::debug!(
            request_id = %request.id(),
            phase = %phase,
            "Request already finished, timeout discarded"
        );
        return false;
    }

    tracing::warn!(
        request_id = %request.id(),
        phase = %phase,
        code = error.code(),
        error = %error,
        "Request timed out"
    );
    metrics::record_timeout(phase);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::target::Target;

    #[test]
    fn messages_match_contract() {
        let connect = TimeoutError::Connect { host: "10.255.255.1".into() };
        assert_eq!(connect.to_string(), "Connection timed out on request to 10.255.255.1");
        assert_eq!(connect.code(), "ETIMEDOUT");

        let socket = TimeoutError::Socket { host: "localhost".into(), port: 8081 };
        assert_eq!(socket.to_string(), "Socket timed out on request to localhost:8081");
        assert_eq!(socket.code(), "ESOCKETTIMEDOUT");
    }

    #[tokio::test]
    async fn fail_aborts_pending_request_once() {
        let request = RequestHandle::new(Target::new("example.com", 8080));

        assert!(fail(&request, Phase::Socket));
        assert!(!fail(&request, Phase::Connect));

        let error = request.failure().unwrap();
        assert_eq!(error.kind(), TimeoutKind::ESocketTimedOut);
        assert_eq!(error.to_string(), "Socket timed out on request to example.com:8080");
    }

    #[test]
    fn fail_is_discarded_after_completion() {
        let request = RequestHandle::new(Target::new("example.com", 80));
        request.complete();

        assert!(!fail(&request, Phase::Connect));
        assert!(request.failure().is_none());
    }
}
