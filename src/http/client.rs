//! Minimal HTTP/1.1 client transport.
//!
//! # Responsibilities
//! - Resolve the target of a request and bind it to a connection
//! - Reuse pooled connections, or connect a fresh one
//! - Emit lifecycle signals on the request handle as the exchange progresses
//! - Surface timeout failures through the same error path as transport errors
//!
//! # Design Decisions
//! - A pooled connection is bound during `request()`, before `send()`, so
//!   timeouts attached in between see the request as already connected
//! - The exchange races the request's failure channel; a published timeout
//!   always wins over whatever error the aborted connection produced
//! - Response bodies are collected in full before the request completes

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONNECTION, HOST};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{ClientConfig, TimeoutConfig};
use crate::http::pool::{ConnectionPool, PooledConnection};
use crate::http::request::{Outcome, RequestHandle};
use crate::net::connection::ConnectionHandle;
use crate::net::io::ObservedIo;
use crate::net::target::Target;
use crate::observability::metrics;
use crate::resilience::emitter::{TimeoutError, TimeoutKind};
use crate::resilience::timeouts;

/// Error type for client requests.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("invalid request uri {0:?}")]
    InvalidUri(String),

    #[error("unsupported scheme {0:?}, only http is supported")]
    UnsupportedScheme(String),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: Target,
        #[source]
        source: io::Error,
    },

    #[error("connection attempt to {0} was aborted")]
    Aborted(Target),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),
}

impl ClientError {
    /// `ETIMEDOUT` / `ESOCKETTIMEDOUT` discriminator for timeout failures.
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            ClientError::Timeout(error) => Some(error.kind()),
            _ => None,
        }
    }
}

/// Opens transport streams to a target.
pub trait Connect: Clone + Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, target: &Target) -> impl Future<Output = io::Result<Self::Io>> + Send;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Io = TcpStream;

    fn connect(&self, target: &Target) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let host = target.host().to_string();
        let port = target.port();
        async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

/// HTTP/1.1 client with a keep-alive pool.
#[derive(Debug, Clone)]
pub struct HttpClient<C = TcpConnector> {
    connector: C,
    pool: Arc<ConnectionPool>,
    config: Arc<ClientConfig>,
}

impl HttpClient<TcpConnector> {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(TcpConnector, config)
    }
}

impl Default for HttpClient<TcpConnector> {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl<C: Connect> HttpClient<C> {
    pub fn with_connector(connector: C, config: ClientConfig) -> Self {
        Self {
            connector,
            pool: Arc::new(ConnectionPool::new(config.pool.clone())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Prepare a GET request for `uri`.
    pub fn get(&self, uri: &str) -> Result<PendingRequest<C>, ClientError> {
        let request = Request::get(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|_| ClientError::InvalidUri(uri.to_string()))?;
        self.request(request)
    }

    /// Prepare `request` for sending.
    ///
    /// The returned [`PendingRequest`] exposes the request handle so timeouts
    /// can be attached before anything is sent.
    pub fn request(&self, request: Request<Full<Bytes>>) -> Result<PendingRequest<C>, ClientError> {
        let (mut parts, body) = request.into_parts();
        match parts.uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(ClientError::UnsupportedScheme(other.to_string())),
            None => return Err(ClientError::InvalidUri(parts.uri.to_string())),
        }
        let target = Target::from_uri(&parts.uri)
            .ok_or_else(|| ClientError::InvalidUri(parts.uri.to_string()))?;

        if !parts.headers.contains_key(HOST) {
            let authority = parts.uri.authority().map(|a| a.as_str()).unwrap_or_default();
            let value = HeaderValue::from_str(authority)
                .map_err(|_| ClientError::InvalidUri(parts.uri.to_string()))?;
            parts.headers.insert(HOST, value);
        }
        let origin: Uri = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .parse()
            .map_err(|_| ClientError::InvalidUri(parts.uri.to_string()))?;
        parts.uri = origin;

        let handle = RequestHandle::new(target.clone());
        let pooled = self.pool.checkout(&target);
        if let Some(pooled) = &pooled {
            handle.assign_connection(pooled.connection().clone());
        }

        tracing::debug!(
            request_id = %handle.id(),
            target = %target,
            reused = pooled.is_some(),
            "Request prepared"
        );

        Ok(PendingRequest {
            client: self.clone(),
            handle,
            request: Request::from_parts(parts, body),
            pooled,
        })
    }

    async fn exchange(
        &self,
        handle: &RequestHandle,
        request: Request<Full<Bytes>>,
        pooled: Option<PooledConnection>,
    ) -> Result<(Response<Bytes>, PooledConnection), ClientError> {
        let mut pooled = match pooled {
            Some(pooled) => pooled,
            None => self.connect(handle).await?,
        };

        let result = async {
            pooled.sender.ready().await?;
            let response = pooled.sender.send_request(request).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await.map_err(ClientError::Body)?.to_bytes();
            Ok::<_, ClientError>(Response::from_parts(parts, body))
        }
        .await;

        match result {
            Ok(response) => Ok((response, pooled)),
            Err(error) => {
                pooled.connection().destroy();
                Err(error)
            }
        }
    }

    async fn connect(&self, handle: &RequestHandle) -> Result<PooledConnection, ClientError> {
        let target = handle.target().clone();
        let connection = ConnectionHandle::new(target.clone());
        handle.assign_connection(connection.clone());

        let io = tokio::select! {
            () = connection.destroyed() => return Err(ClientError::Aborted(target.clone())),
            io = self.connector.connect(&target) => io.map_err(|source| ClientError::Connect {
                target: target.clone(),
                source,
            })?,
        };
        if !connection.mark_established() {
            return Err(ClientError::Aborted(target));
        }
        handle.mark_connected();

        let io = TokioIo::new(ObservedIo::new(io, connection.clone()));
        let (sender, driver) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io).await?;
        let connection_id = connection.id();
        let task = tokio::spawn(async move {
            if let Err(error) = driver.await {
                tracing::debug!(connection_id = %connection_id, error = %error, "Connection closed with error");
            }
        });
        connection.set_driver(task.abort_handle());

        Ok(PooledConnection::new(sender, connection))
    }
}

/// A request whose handle is available before it is sent.
#[derive(Debug)]
pub struct PendingRequest<C = TcpConnector> {
    client: HttpClient<C>,
    handle: RequestHandle,
    request: Request<Full<Bytes>>,
    pooled: Option<PooledConnection>,
}

impl<C: Connect> PendingRequest<C> {
    pub fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    /// Attach connect/socket timeouts to this request.
    pub fn timeout(self, config: impl Into<TimeoutConfig>) -> Self {
        timeouts::attach(&self.handle, config);
        self
    }

    /// Send the request and collect the full response.
    pub async fn send(self) -> Result<Response<Bytes>, ClientError> {
        let PendingRequest {
            client,
            handle,
            request,
            pooled,
        } = self;
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            error = handle.failed() => Err(ClientError::Timeout(error)),
            result = client.exchange(&handle, request, pooled) => result,
        };

        let outcome = match result {
            Ok((response, pooled)) => {
                if handle.complete() {
                    if closes_connection(&response) {
                        pooled.connection().release();
                        pooled.connection().destroy();
                    } else {
                        client.pool.release(pooled);
                    }
                    Ok(response)
                } else {
                    // A timeout won the race after the last byte arrived.
                    pooled.connection().destroy();
                    Err(match handle.failure() {
                        Some(error) => ClientError::Timeout(error),
                        None => ClientError::Aborted(handle.target().clone()),
                    })
                }
            }
            Err(error) => Err(settle_error(&handle, error)),
        };

        match &outcome {
            Ok(response) => tracing::debug!(request_id = %handle.id(), status = %response.status(), "Request completed"),
            Err(error) => tracing::debug!(request_id = %handle.id(), error = %error, "Request failed"),
        }
        if client.config.observability.metrics_enabled {
            let label = match &outcome {
                Ok(_) => "success",
                Err(error) => error.timeout_kind().map_or("error", |kind| kind.as_str()),
            };
            metrics::record_request(label, start);
        }
        outcome
    }
}

/// Record a failed exchange on the request. A transport error raised by the
/// teardown of an already timed-out request is reported as that timeout.
fn settle_error(handle: &RequestHandle, error: ClientError) -> ClientError {
    if matches!(error, ClientError::Timeout(_)) || handle.error(error.to_string()) {
        return error;
    }
    match handle.outcome() {
        Some(Outcome::TimedOut(timeout)) => ClientError::Timeout(timeout),
        _ => error,
    }
}

fn closes_connection(response: &Response<Bytes>) -> bool {
    response
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("close"))
}
