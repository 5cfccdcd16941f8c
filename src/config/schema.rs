//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the timed HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-phase request timeouts.
    pub timeouts: TimeoutConfig,

    /// Keep-alive connection pool settings.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Connect and socket timeouts for a request.
///
/// A missing or zero duration disables that phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "TimeoutSettings", into = "TimeoutSettings")]
pub struct TimeoutConfig {
    connect: Option<Duration>,
    socket: Option<Duration>,
}

impl TimeoutConfig {
    pub fn new(connect: Option<Duration>, socket: Option<Duration>) -> Self {
        Self {
            connect: connect.filter(|d| !d.is_zero()),
            socket: socket.filter(|d| !d.is_zero()),
        }
    }

    /// Same duration for both phases.
    pub fn uniform(duration: Duration) -> Self {
        Self::new(Some(duration), Some(duration))
    }

    /// Only bound connection establishment.
    pub fn connect(duration: Duration) -> Self {
        Self::new(Some(duration), None)
    }

    /// Only bound idle gaps on the established connection.
    pub fn socket(duration: Duration) -> Self {
        Self::new(None, Some(duration))
    }

    pub fn with_connect(self, duration: Duration) -> Self {
        Self::new(Some(duration), self.socket)
    }

    pub fn with_socket(self, duration: Duration) -> Self {
        Self::new(self.connect, Some(duration))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket
    }

    /// True when neither phase is enforced.
    pub fn is_disabled(&self) -> bool {
        self.connect.is_none() && self.socket.is_none()
    }
}

impl From<Duration> for TimeoutConfig {
    fn from(duration: Duration) -> Self {
        Self::uniform(duration)
    }
}

/// Milliseconds applied to both phases.
impl From<u64> for TimeoutConfig {
    fn from(millis: u64) -> Self {
        Self::uniform(Duration::from_millis(millis))
    }
}

/// On-disk form of [`TimeoutConfig`]: a bare number of milliseconds or a
/// table with optional `connect_ms` / `socket_ms`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(untagged)]
enum TimeoutSettings {
    Uniform(u64),
    Phases {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connect_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_ms: Option<u64>,
    },
}

impl From<TimeoutSettings> for TimeoutConfig {
    fn from(settings: TimeoutSettings) -> Self {
        match settings {
            TimeoutSettings::Uniform(ms) => TimeoutConfig::from(ms),
            TimeoutSettings::Phases { connect_ms, socket_ms } => TimeoutConfig::new(
                connect_ms.map(Duration::from_millis),
                socket_ms.map(Duration::from_millis),
            ),
        }
    }
}

impl From<TimeoutConfig> for TimeoutSettings {
    fn from(config: TimeoutConfig) -> Self {
        TimeoutSettings::Phases {
            connect_ms: config.connect.map(ceil_millis),
            socket_ms: config.socket.map(ceil_millis),
        }
    }
}

/// Whole milliseconds, rounded up so an enabled phase never serializes as 0.
fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Keep-alive pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Reuse connections across requests.
    pub enabled: bool,

    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,

    /// Idle pooled connections older than this are discarded, in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_idle_per_host: 8,
            idle_timeout_secs: 90,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Record request latency metrics in the client.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
