//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound connection establishment (connect phase)
//! - Bound idle gaps on the established connection (socket phase)
//! - Skip the connect phase for connections reused from the pool
//! - Cancel every timer and listener the moment the request ends
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities, one owned timer per phase
//! - The two phase timers are never armed at the same time
//! - The socket timer slides: each activity resets it to the full duration
//! - One task per request processes signals serially; signals win over
//!   timers so a request that already finished is never failed
//! - Teardown lives in `Drop`, so it runs on every exit path

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

use crate::config::TimeoutConfig;
use crate::http::request::{RequestHandle, RequestId, Signal, Subscription, WeakRequestHandle};
use crate::net::connection::ConnectionHandle;
use crate::net::instrument::InstrumentationGuard;
use crate::resilience::emitter::{self, Phase};

/// Attach connect and socket timeouts to an in-flight request.
///
/// Must be called before the transport proceeds with the request. Never fails:
/// a disabled configuration, a request that already ended, a second attach to
/// the same request, or a missing Tokio runtime all make this a no-op.
/// Expired timeouts surface through [`RequestHandle::failed`].
pub fn attach(request: &RequestHandle, config: impl Into<TimeoutConfig>) {
    let config = config.into();
    if config.is_disabled() {
        tracing::trace!(request_id = %request.id(), "No timeouts configured");
        return;
    }
    if request.is_terminal() {
        tracing::debug!(request_id = %request.id(), "Request already finished, timeouts not attached");
        return;
    }
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            tracing::warn!(request_id = %request.id(), "No Tokio runtime, timeouts not attached");
            return;
        }
    };
    if !request.claim_timeouts() {
        tracing::debug!(request_id = %request.id(), "Timeouts already attached");
        return;
    }

    let subscription = request.subscribe();
    let mut controller = TimeoutController::new(request, config, subscription);

    match request.connection() {
        Some(connection) if connection.is_established() => {
            tracing::debug!(
                request_id = %request.id(),
                connection_id = %connection.id(),
                "Connection already established, skipping connect phase"
            );
            controller.enter_socket_phase(connection);
        }
        pending => {
            controller.connection = pending;
            controller.arm_connect();
        }
    }

    runtime.spawn(controller.run());
}

/// Single-shot timer for one phase. Re-arming replaces the previous deadline.
///
/// The underlying `Sleep` is allocated on first arm and reset in place after.
#[derive(Debug)]
pub struct PhaseTimer {
    phase: Phase,
    sleep: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl PhaseTimer {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            sleep: None,
            armed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Arm for `duration` from now, replacing any previous deadline.
    pub fn arm(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        self.armed = true;
        if let Some(sleep) = self.sleep.as_mut() {
            sleep.as_mut().reset(deadline);
            return;
        }
        self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline)));
    }

    pub fn cancel(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep
            .as_ref()
            .filter(|_| self.armed)
            .map(|sleep| sleep.deadline())
    }

    /// Completes when the armed deadline passes. Never completes while disarmed.
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) if self.armed => sleep.as_mut().await,
            _ => std::future::pending().await,
        }
    }
}

enum Event {
    Signal(Option<Signal>),
    Expired(Phase),
}

/// Per-request timeout state machine.
#[derive(Debug)]
struct TimeoutController {
    request: WeakRequestHandle,
    request_id: RequestId,
    connect: Option<Duration>,
    socket: Option<Duration>,
    connect_timer: PhaseTimer,
    socket_timer: PhaseTimer,
    /// Connection bound while still connecting.
    connection: Option<ConnectionHandle>,
    socket_phase_entered: bool,
    instrumentation: Option<InstrumentationGuard>,
    subscription: Option<Subscription>,
}

impl TimeoutController {
    fn new(request: &RequestHandle, config: TimeoutConfig, subscription: Subscription) -> Self {
        Self {
            request: request.downgrade(),
            request_id: request.id(),
            connect: config.connect_timeout(),
            socket: config.socket_timeout(),
            connect_timer: PhaseTimer::new(Phase::Connect),
            socket_timer: PhaseTimer::new(Phase::Socket),
            connection: None,
            socket_phase_entered: false,
            instrumentation: None,
            subscription: Some(subscription),
        }
    }

    async fn run(mut self) {
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            let event = tokio::select! {
                biased;
                signal = subscription.recv() => Event::Signal(signal),
                () = self.connect_timer.expired() => Event::Expired(Phase::Connect),
                () = self.socket_timer.expired() => Event::Expired(Phase::Socket),
            };

            match event {
                Event::Signal(Some(signal)) => {
                    if !self.on_signal(signal) {
                        break;
                    }
                }
                Event::Signal(None) => {
                    tracing::trace!(request_id = %self.request_id, "Request gone, stopping timeouts");
                    break;
                }
                Event::Expired(phase) => {
                    self.expire(phase);
                    break;
                }
            }
        }
        self.teardown();
    }

    /// Returns `false` once the request has reached a terminal state.
    fn on_signal(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::ConnectionAssigned(connection) => {
                if connection.is_established() {
                    // Reused from the pool: nothing left to connect.
                    self.enter_socket_phase(connection);
                } else {
                    self.connection = Some(connection);
                }
                true
            }
            Signal::Connected => {
                let connection = self
                    .connection
                    .take()
                    .or_else(|| self.request.upgrade().and_then(|r| r.connection()));
                match connection {
                    Some(connection) => self.enter_socket_phase(connection),
                    None => self.connect_timer.cancel(),
                }
                true
            }
            Signal::Activity => {
                if let Some(socket) = self.socket {
                    if self.socket_timer.is_armed() {
                        tracing::trace!(request_id = %self.request_id, "Socket activity, timer reset");
                        self.socket_timer.arm(socket);
                    }
                }
                true
            }
            Signal::Completed | Signal::Errored(_) | Signal::Released => {
                tracing::trace!(request_id = %self.request_id, signal = ?signal, "Request finished");
                false
            }
        }
    }

    fn arm_connect(&mut self) {
        if let Some(connect) = self.connect {
            self.connect_timer.arm(connect);
            tracing::debug!(
                request_id = %self.request_id,
                timeout_ms = connect.as_millis() as u64,
                "Connect timer armed"
            );
        }
    }

    /// Leave the connect phase and, if configured, start socket timing.
    /// Runs at most once per request.
    fn enter_socket_phase(&mut self, connection: ConnectionHandle) {
        if self.connect_timer.is_armed() {
            self.connect_timer.cancel();
            tracing::debug!(
                request_id = %self.request_id,
                connection_id = %connection.id(),
                "Connected, connect timer cancelled"
            );
        }
        if self.socket_phase_entered {
            return;
        }
        self.socket_phase_entered = true;

        let Some(socket) = self.socket else {
            return;
        };
        let Some(listener) = self.subscription.as_ref().and_then(Subscription::listener) else {
            return;
        };
        match InstrumentationGuard::acquire(&connection, self.request_id, listener) {
            Some(guard) => {
                self.instrumentation = Some(guard);
                self.socket_timer.arm(socket);
                tracing::debug!(
                    request_id = %self.request_id,
                    connection_id = %connection.id(),
                    timeout_ms = socket.as_millis() as u64,
                    "Socket timer armed"
                );
            }
            None => {
                tracing::trace!(
                    request_id = %self.request_id,
                    connection_id = %connection.id(),
                    "Connection already instrumented for this request"
                );
            }
        }
    }

    fn expire(&mut self, phase: Phase) {
        self.teardown();
        if let Some(request) = self.request.upgrade() {
            emitter::fail(&request, phase);
        }
    }

    /// Cancel timers, drop the connection listener and deregister. Idempotent.
    fn teardown(&mut self) {
        self.connect_timer.cancel();
        self.socket_timer.cancel();
        self.instrumentation = None;
        self.connection = None;
        self.subscription = None;
    }
}

impl Drop for TimeoutController {
    fn drop(&mut self) {
        self.teardown();
    }
}
