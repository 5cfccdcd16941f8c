//! Keep-alive connection pool.
//!
//! # Responsibilities
//! - Keep established HTTP/1.1 connections for reuse, grouped by host:port
//! - Hand out only live connections
//! - Release each connection explicitly so its instrumentation resets
//!
//! # Design Decisions
//! - Idle connections are not timed by the request timeouts; they expire
//!   lazily at checkout once older than `idle_timeout_secs`
//! - Bounded per host; surplus connections are destroyed on release

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::Full;
use hyper::client::conn::http1::SendRequest;
use std::time::Instant;

use crate::config::PoolConfig;
use crate::net::connection::ConnectionHandle;
use crate::net::target::Target;

/// An established connection plus the hyper handle that sends on it.
#[derive(Debug)]
pub struct PooledConnection {
    pub(crate) sender: SendRequest<Full<Bytes>>,
    connection: ConnectionHandle,
    idle_since: Instant,
}

impl PooledConnection {
    pub(crate) fn new(sender: SendRequest<Full<Bytes>>, connection: ConnectionHandle) -> Self {
        Self {
            sender,
            connection,
            idle_since: Instant::now(),
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn is_usable(&self) -> bool {
        !self.sender.is_closed() && !self.connection.is_destroyed()
    }
}

/// Idle connections keyed by target.
#[derive(Debug)]
pub struct ConnectionPool {
    idle: DashMap<String, Vec<PooledConnection>>,
    config: PoolConfig,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: DashMap::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Take a live idle connection to `target`, discarding dead or expired ones.
    pub fn checkout(&self, target: &Target) -> Option<PooledConnection> {
        if !self.config.enabled {
            return None;
        }
        let idle_timeout = self.config.idle_timeout();
        let key = target.pool_key();
        let found = {
            let mut entry = self.idle.get_mut(&key)?;
            loop {
                let Some(pooled) = entry.pop() else {
                    break None;
                };
                if pooled.is_usable() && pooled.idle_since.elapsed() < idle_timeout {
                    break Some(pooled);
                }
                tracing::trace!(connection_id = %pooled.connection.id(), "Discarding stale pooled connection");
                pooled.connection.destroy();
            }
        };
        // Entry guard dropped above; removing under it would deadlock the shard.
        self.idle.remove_if(&key, |_, idle| idle.is_empty());

        if let Some(pooled) = &found {
            tracing::debug!(
                connection_id = %pooled.connection.id(),
                target = %target,
                "Reusing pooled connection"
            );
        }
        found
    }

    /// Return a connection after its request finished.
    ///
    /// The connection's instrumentation is always reset. It is kept only when
    /// pooling is enabled, it is still live and the host has room.
    pub fn release(&self, mut pooled: PooledConnection) {
        pooled.connection.release();

        if !self.config.enabled || !pooled.is_usable() {
            pooled.connection.destroy();
            return;
        }

        let target = pooled.connection.target().clone();
        let mut entry = self.idle.entry(target.pool_key()).or_default();
        if entry.len() >= self.config.max_idle_per_host {
            tracing::trace!(target = %target, "Pool full, closing connection");
            pooled.connection.destroy();
            return;
        }
        pooled.idle_since = Instant::now();
        entry.push(pooled);
    }

    /// Number of idle connections held for `target`.
    pub fn idle_count(&self, target: &Target) -> usize {
        self.idle
            .get(&target.pool_key())
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Destroy every idle connection.
    pub fn clear(&self) {
        self.idle.retain(|_, idle| {
            for pooled in idle.drain(..) {
                pooled.connection.destroy();
            }
            false
        });
    }

    /// Number of hosts with at least one idle connection.
    pub fn host_count(&self) -> usize {
        self.idle.len()
    }
}
