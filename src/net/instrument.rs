//! Per-connection instrumentation marker.
//!
//! # Responsibilities
//! - Record which logical request currently has its activity listener
//!   installed on a physical connection
//! - Refuse a second installation for the same occupant
//! - Hand instrumentation over cleanly when a pooled connection is reused
//!
//! # Design Decisions
//! - Tagged state keyed by request identity, not listener counting
//! - A stale marker left by another occupant is replaced, and the stale
//!   listener is told the connection was released
//! - Teardown is RAII: [`InstrumentationGuard`] clears only its own marker

use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::http::request::{RequestId, Signal};
use crate::net::connection::ConnectionHandle;

/// Listener end that receives activity for the occupying request.
pub type Listener = mpsc::UnboundedSender<Signal>;

#[derive(Debug, Default)]
enum Instrumentation {
    #[default]
    Uninstrumented,
    Instrumented {
        occupant: RequestId,
        listener: Listener,
    },
}

/// Instrumentation state of one physical connection.
#[derive(Debug, Default)]
pub struct InstrumentationMarker {
    state: Mutex<Instrumentation>,
}

impl InstrumentationMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True unless `occupant` already has its listener installed.
    pub fn should_instrument(&self, occupant: RequestId) -> bool {
        match &*self.lock() {
            Instrumentation::Instrumented { occupant: current, .. } => *current != occupant,
            Instrumentation::Uninstrumented => true,
        }
    }

    /// Install `listener` for `occupant`.
    ///
    /// Returns `false` without touching anything when the same occupant is
    /// already instrumented. A marker held by a different occupant is stale
    /// (connections are used by one request at a time) and gets replaced.
    pub fn mark_instrumented(&self, occupant: RequestId, listener: Listener) -> bool {
        let mut state = self.lock();
        match &*state {
            Instrumentation::Instrumented { occupant: current, .. } if *current == occupant => {
                return false;
            }
            Instrumentation::Instrumented { occupant: stale, listener: stale_listener } => {
                tracing::debug!(
                    stale_request_id = %stale,
                    request_id = %occupant,
                    "Replacing stale connection instrumentation"
                );
                let _ = stale_listener.send(Signal::Released);
            }
            Instrumentation::Uninstrumented => {}
        }
        *state = Instrumentation::Instrumented { occupant, listener };
        true
    }

    /// Reset the marker because the connection went back to the pool.
    ///
    /// The occupant's listener, if any, receives [`Signal::Released`].
    pub fn clear_on_release(&self) -> Option<RequestId> {
        let previous = std::mem::take(&mut *self.lock());
        match previous {
            Instrumentation::Instrumented { occupant, listener } => {
                let _ = listener.send(Signal::Released);
                Some(occupant)
            }
            Instrumentation::Uninstrumented => None,
        }
    }

    /// Reset the marker only if it still belongs to `occupant`.
    pub fn clear_for(&self, occupant: RequestId) -> bool {
        let mut state = self.lock();
        match &*state {
            Instrumentation::Instrumented { occupant: current, .. } if *current == occupant => {
                *state = Instrumentation::Uninstrumented;
                true
            }
            _ => false,
        }
    }

    /// Forward an activity signal to the occupant's listener.
    pub fn notify_activity(&self) {
        if let Instrumentation::Instrumented { listener, .. } = &*self.lock() {
            let _ = listener.send(Signal::Activity);
        }
    }

    /// Request currently holding the instrumentation, if any.
    pub fn occupant(&self) -> Option<RequestId> {
        match &*self.lock() {
            Instrumentation::Instrumented { occupant, .. } => Some(*occupant),
            Instrumentation::Uninstrumented => None,
        }
    }

    pub fn is_instrumented(&self) -> bool {
        self.occupant().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Instrumentation> {
        self.state.lock().expect("instrumentation marker mutex poisoned")
    }
}

/// Owned instrumentation of one connection by one request.
/// Clears the marker when dropped.
#[derive(Debug)]
pub struct InstrumentationGuard {
    connection: ConnectionHandle,
    occupant: RequestId,
}

impl InstrumentationGuard {
    /// Instrument `connection` for `occupant`, unless that already happened.
    pub fn acquire(
        connection: &ConnectionHandle,
        occupant: RequestId,
        listener: Listener,
    ) -> Option<Self> {
        let marker = connection.instrumentation();
        if !marker.should_instrument(occupant) || !marker.mark_instrumented(occupant, listener) {
            return None;
        }
        tracing::trace!(
            connection_id = %connection.id(),
            request_id = %occupant,
            "Connection instrumented"
        );
        Some(Self {
            connection: connection.clone(),
            occupant,
        })
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }
}

impl Drop for InstrumentationGuard {
    fn drop(&mut self) {
        if self.connection.instrumentation().clear_for(self.occupant) {
            tracing::trace!(
                connection_id = %self.connection.id(),
                request_id = %self.occupant,
                "Connection instrumentation cleared"
            );
        }
    }
}
