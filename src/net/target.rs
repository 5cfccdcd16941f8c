//! Remote endpoint a request is addressed to.

use hyper::Uri;

/// Host and port of the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// Create a target from a host name (or address literal) and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Derive the target of an absolute `http://` URI.
    ///
    /// Returns `None` when the URI carries no host. A missing port defaults to 80.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let host = uri.host()?;
        // IPv6 literals come back bracketed from `Uri::host`.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Some(Self::new(host, uri.port_u16().unwrap_or(80)))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Key used to group pooled connections.
    pub fn pool_key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_80() {
        let uri: Uri = "http://example.com/path".parse().unwrap();
        let target = Target::from_uri(&uri).unwrap();
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), 80);
    }

    #[test]
    fn explicit_port_and_ipv6() {
        let uri: Uri = "http://[::1]:8080/".parse().unwrap();
        let target = Target::from_uri(&uri).unwrap();
        assert_eq!(target.host(), "::1");
        assert_eq!(target.to_string(), "[::1]:8080");
    }

    #[test]
    fn relative_uri_has_no_target() {
        let uri: Uri = "/only/a/path".parse().unwrap();
        assert!(Target::from_uri(&uri).is_none());
    }
}
