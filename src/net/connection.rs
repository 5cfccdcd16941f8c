//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Connecting → Established → Destroyed)
//! - Generate unique connection IDs for tracing
//! - Forward socket activity to the instrumenting request
//! - Abort pending connects and established connections on demand

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::net::instrument::InstrumentationMarker;
use crate::net::target::Target;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handshake in progress.
    Connecting = 0,
    /// Handshake complete, bytes may flow.
    Established = 1,
    /// Closed or aborted. Terminal.
    Destroyed = 2,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            1 => ConnectionState::Established,
            2 => ConnectionState::Destroyed,
            _ => ConnectionState::Connecting,
        }
    }
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    target: Target,
    state: AtomicU8,
    marker: InstrumentationMarker,
    destroyed: watch::Sender<bool>,
    /// Task driving the HTTP connection, aborted on destroy.
    driver: Mutex<Option<AbortHandle>>,
}

/// Shared handle to one physical transport connection.
///
/// Cloning is cheap; clones refer to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// Create a handle for a connection attempt to `target`.
    pub fn new(target: Target) -> Self {
        let (destroyed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                target,
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                marker: InstrumentationMarker::new(),
                destroyed,
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == ConnectionState::Destroyed
    }

    /// Transition Connecting → Established. No effect on a destroyed connection.
    pub fn mark_established(&self) -> bool {
        let established = self
            .inner
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Established as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if established {
            tracing::trace!(connection_id = %self.id(), target = %self.target(), "Connection established");
        }
        established
    }

    /// Instrumentation marker of this connection.
    pub fn instrumentation(&self) -> &InstrumentationMarker {
        &self.inner.marker
    }

    /// Report inbound or outbound bytes on this connection.
    pub fn record_activity(&self) {
        self.inner.marker.notify_activity();
    }

    /// Register the task that drives this connection so `destroy` can stop it.
    pub fn set_driver(&self, driver: AbortHandle) {
        if self.is_destroyed() {
            driver.abort();
            return;
        }
        let mut slot = self.inner.driver.lock().expect("connection driver mutex poisoned");
        *slot = Some(driver);
    }

    /// Abort the connection attempt or tear down the established connection.
    pub fn destroy(&self) {
        let previous = self.inner.state.swap(ConnectionState::Destroyed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Destroyed as u8 {
            return;
        }
        self.inner.destroyed.send_replace(true);
        let driver = self
            .inner
            .driver
            .lock()
            .expect("connection driver mutex poisoned")
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
        tracing::debug!(connection_id = %self.id(), target = %self.target(), "Connection destroyed");
    }

    /// Resolves once [`destroy`](Self::destroy) has been called.
    pub async fn destroyed(&self) {
        let mut rx = self.inner.destroyed.subscribe();
        // The sender lives as long as `self`, so this only errors on shutdown.
        let _ = rx.wait_for(|destroyed| *destroyed).await;
    }

    /// The connection went back to the pool: reset instrumentation so the
    /// next occupant starts clean.
    pub fn release(&self) {
        if let Some(occupant) = self.inner.marker.clear_on_release() {
            tracing::trace!(
                connection_id = %self.id(),
                request_id = %occupant,
                "Released connection from request"
            );
        }
    }

    /// True when both handles refer to the same physical connection.
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle() -> ConnectionHandle {
        ConnectionHandle::new(Target::new("127.0.0.1", 8080))
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn state_transitions() {
        let conn = handle();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.mark_established());
        assert!(conn.is_established());
        assert!(!conn.mark_established());

        conn.destroy();
        assert!(conn.is_destroyed());
        assert!(!conn.mark_established());
    }

    #[tokio::test]
    async fn destroyed_resolves_after_destroy() {
        let conn = handle();
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.destroyed().await })
        };
        conn.destroy();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("destroyed() did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn destroy_aborts_driver() {
        let conn = handle();
        let driver = tokio::spawn(std::future::pending::<()>());
        conn.set_driver(driver.abort_handle());
        conn.destroy();
        assert!(driver.await.unwrap_err().is_cancelled());
    }
}
