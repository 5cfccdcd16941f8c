//! Logical request handle and lifecycle signals.
//!
//! # Responsibilities
//! - Identify one logical outbound request (UUID v4)
//! - Bind the request to the physical connection serving it
//! - Fan lifecycle signals out to subscribers in emission order
//! - Carry the terminal outcome and the asynchronous failure channel
//!
//! # Design Decisions
//! - The transport owns the handle; observers keep a weak reference
//! - The first terminal outcome wins; later ones are ignored
//! - Subscriptions deregister themselves when dropped

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::net::connection::ConnectionHandle;
use crate::net::target::Target;
use crate::resilience::emitter::TimeoutError;

/// Unique identifier of a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle signal emitted by the transport.
#[derive(Debug, Clone)]
pub enum Signal {
    /// A connection was bound to the request. It may still be connecting.
    ConnectionAssigned(ConnectionHandle),
    /// The bound connection finished its handshake.
    Connected,
    /// Bytes moved on the bound connection, in either direction.
    Activity,
    /// The request finished successfully.
    Completed,
    /// The request failed for a reason other than a timeout.
    Errored(String),
    /// The connection was returned to the pool.
    Released,
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Errored(String),
    TimedOut(TimeoutError),
}

#[derive(Debug, Default)]
struct RequestState {
    connection: Option<ConnectionHandle>,
    outcome: Option<Outcome>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<Signal>)>,
    next_subscriber: u64,
}

#[derive(Debug)]
struct RequestInner {
    id: RequestId,
    target: Target,
    state: Mutex<RequestState>,
    failure: watch::Sender<Option<TimeoutError>>,
    timeouts_attached: AtomicBool,
}

/// Handle to one in-flight logical request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    inner: Arc<RequestInner>,
}

impl RequestHandle {
    pub fn new(target: Target) -> Self {
        let (failure, _) = watch::channel(None);
        Self {
            inner: Arc::new(RequestInner {
                id: RequestId::new(),
                target,
                state: Mutex::new(RequestState::default()),
                failure,
                timeouts_attached: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// Connection currently bound to this request.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.lock().connection.clone()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.lock().outcome.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Timeout error published for this request, if any.
    pub fn failure(&self) -> Option<TimeoutError> {
        self.inner.failure.borrow().clone()
    }

    /// Resolves with the timeout error once one is published.
    pub async fn failed(&self) -> TimeoutError {
        let mut rx = self.inner.failure.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(error) = current {
                return error;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Register an observer of this request's signals.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tx.downgrade();
        let mut state = self.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push((id, tx));
        Subscription {
            id,
            rx,
            listener,
            request: Arc::downgrade(&self.inner),
        }
    }

    pub fn downgrade(&self) -> WeakRequestHandle {
        WeakRequestHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Mark timeouts as attached. Returns `false` if they already were.
    pub(crate) fn claim_timeouts(&self) -> bool {
        !self.inner.timeouts_attached.swap(true, Ordering::AcqRel)
    }

    // --- Transport side ---

    /// Bind `connection` to this request.
    pub fn assign_connection(&self, connection: ConnectionHandle) {
        let mut state = self.lock();
        if state.outcome.is_some() {
            return;
        }
        state.connection = Some(connection.clone());
        Self::emit(&mut state, Signal::ConnectionAssigned(connection));
    }

    /// The bound connection finished its handshake.
    pub fn mark_connected(&self) {
        let mut state = self.lock();
        if state.outcome.is_none() {
            Self::emit(&mut state, Signal::Connected);
        }
    }

    /// The request finished successfully. Returns `false` if it had already ended.
    pub fn complete(&self) -> bool {
        self.finish(Outcome::Completed, Signal::Completed)
    }

    /// The request failed for a reason other than a timeout.
    pub fn error(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.finish(Outcome::Errored(reason.clone()), Signal::Errored(reason))
    }

    /// Fail the request with `error`, destroying its connection.
    ///
    /// The failure is published before the connection goes down, so whoever
    /// observes the destroyed connection also observes the timeout.
    /// Ignored when the request already has a terminal outcome.
    pub fn abort(&self, error: TimeoutError) -> bool {
        let connection = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(Outcome::TimedOut(error.clone()));
            Self::emit(&mut state, Signal::Errored(error.to_string()));
            state.connection.clone()
        };
        self.inner.failure.send_replace(Some(error));
        if let Some(connection) = connection {
            connection.destroy();
        }
        true
    }

    fn finish(&self, outcome: Outcome, signal: Signal) -> bool {
        let mut state = self.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        Self::emit(&mut state, signal);
        true
    }

    fn emit(state: &mut RequestState, signal: Signal) {
        state
            .subscribers
            .retain(|(_, tx)| tx.send(signal.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.inner.state.lock().expect("request state mutex poisoned")
    }
}

/// Non-owning reference to a [`RequestHandle`].
#[derive(Debug, Clone)]
pub struct WeakRequestHandle {
    inner: Weak<RequestInner>,
}

impl WeakRequestHandle {
    pub fn upgrade(&self) -> Option<RequestHandle> {
        self.inner.upgrade().map(|inner| RequestHandle { inner })
    }
}

/// Registration of one observer. Deregistered on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Signal>,
    listener: mpsc::WeakUnboundedSender<Signal>,
    request: Weak<RequestInner>,
}

impl Subscription {
    /// Next signal, or `None` once the request and every listener are gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }

    /// Sender feeding this subscription, for installing on a connection.
    pub fn listener(&self) -> Option<mpsc::UnboundedSender<Signal>> {
        self.listener.upgrade()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.request.upgrade() {
            if let Ok(mut state) = inner.state.lock() {
                state.subscribers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> RequestHandle {
        RequestHandle::new(Target::new("example.com", 80))
    }

    fn subscriber_count(request: &RequestHandle) -> usize {
        request.lock().subscribers.len()
    }

    #[test]
    fn signals_arrive_in_order() {
        let request = request();
        let mut subscription = request.subscribe();
        let connection = ConnectionHandle::new(request.target().clone());

        request.assign_connection(connection.clone());
        request.mark_connected();
        request.complete();

        assert!(matches!(subscription.try_recv(), Some(Signal::ConnectionAssigned(c)) if c.same_as(&connection)));
        assert!(matches!(subscription.try_recv(), Some(Signal::Connected)));
        assert!(matches!(subscription.try_recv(), Some(Signal::Completed)));
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn first_outcome_wins() {
        let request = request();
        assert!(request.complete());
        assert!(!request.error("late"));
        assert!(!request.abort(TimeoutError::Connect { host: "example.com".into() }));
        assert_eq!(request.outcome(), Some(Outcome::Completed));
    }

    #[test]
    fn abort_destroys_bound_connection() {
        let request = request();
        let connection = ConnectionHandle::new(request.target().clone());
        request.assign_connection(connection.clone());

        assert!(request.abort(TimeoutError::Connect { host: "example.com".into() }));
        assert!(connection.is_destroyed());
        assert!(request.is_terminal());
    }

    #[test]
    fn dropped_subscription_deregisters() {
        let request = request();
        let subscription = request.subscribe();
        assert_eq!(subscriber_count(&request), 1);
        drop(subscription);
        assert_eq!(subscriber_count(&request), 0);
    }

    #[test]
    fn timeouts_claimed_once() {
        let request = request();
        assert!(request.claim_timeouts());
        assert!(!request.claim_timeouts());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_visible_once_connection_destroyed() {
        for _ in 0..100 {
            let request = request();
            let connection = ConnectionHandle::new(request.target().clone());
            request.assign_connection(connection.clone());

            let observer = {
                let request = request.clone();
                tokio::spawn(async move {
                    connection.destroyed().await;
                    request.failure()
                })
            };
            tokio::task::yield_now().await;
            request.abort(TimeoutError::Socket { host: "example.com".into(), port: 80 });

            let seen = observer.await.unwrap();
            assert_eq!(seen.map(|e| e.code()), Some("ESOCKETTIMEDOUT"));
        }
    }

    #[tokio::test]
    async fn failed_resolves_with_error() {
        let request = request();
        let waiter = {
            let request = request.clone();
            tokio::spawn(async move { request.failed().await })
        };
        request.abort(TimeoutError::Socket { host: "example.com".into(), port: 80 });

        let error = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(error.code(), "ESOCKETTIMEDOUT");
    }
}
